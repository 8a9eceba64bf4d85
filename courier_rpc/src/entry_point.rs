use {
    crate::{
        domain::{MethodName, RoutingKey, ServiceName},
        error::RpcError,
    },
    std::{fmt, ops::Deref, str::FromStr},
};

/// A bus address in `service[.method]` form.
///
/// The string form is `"service.method"` for a full address, `"service"` for
/// a service-only address and the empty string for the null address. Topic
/// routing keys are the string form; the null address has none.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum EntryPoint {
    /// The empty address. Carried by headers that are intentionally blank,
    /// e.g. `reply_to` of a cast request.
    Null,

    /// A service without a method part.
    Service(ServiceName),

    /// A fully qualified `service.method` address.
    Method(ServiceName, MethodName),
}

impl EntryPoint {
    pub fn null() -> Self {
        Self::Null
    }

    pub fn service_only(service: impl Into<ServiceName>) -> Self {
        Self::Service(service.into())
    }

    pub fn full(service: impl Into<ServiceName>, method: impl Into<MethodName>) -> Self {
        Self::Method(service.into(), method.into())
    }

    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            Self::Null => None,
            Self::Service(service) | Self::Method(service, _) => Some(service),
        }
    }

    pub fn method(&self) -> Option<&MethodName> {
        match self {
            Self::Method(_, method) => Some(method),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The topic routing key for this address. Forbidden on the null address.
    pub fn to_routing_key(&self) -> Result<RoutingKey, RpcError> {
        if self.is_null() {
            return Err(RpcError::WrongEntryPointFormat);
        }

        Ok(RoutingKey::from(self.to_string()))
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Service(service) => write!(f, "{service}"),
            Self::Method(service, method) => write!(f, "{service}.{method}"),
        }
    }
}

impl FromStr for EntryPoint {
    type Err = RpcError;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        if val.is_empty() {
            return Ok(Self::Null);
        }

        match val.split_once('.') {
            None => Ok(Self::Service(val.into())),

            Some((service, method)) => {
                if service.is_empty() || method.is_empty() || method.contains('.') {
                    return Err(RpcError::WrongEntryPointFormat);
                }

                Ok(Self::Method(service.into(), method.into()))
            }
        }
    }
}

/// Role wrapper marking an address as the origin of an envelope.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Source(pub EntryPoint);

/// Role wrapper marking an address as the target of an envelope.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Destination(pub EntryPoint);

macro_rules! impl_role_wrapper {
    ($Role:ident) => {
        impl Deref for $Role {
            type Target = EntryPoint;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<EntryPoint> for $Role {
            fn from(val: EntryPoint) -> Self {
                Self(val)
            }
        }

        impl FromStr for $Role {
            type Err = RpcError;

            fn from_str(val: &str) -> Result<Self, Self::Err> {
                val.parse::<EntryPoint>().map(Self)
            }
        }

        impl fmt::Display for $Role {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

impl_role_wrapper!(Source);
impl_role_wrapper!(Destination);
