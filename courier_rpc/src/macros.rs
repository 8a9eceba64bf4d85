/// Implements an `Arc<str>`-backed name or identifier newtype: cheap to
/// clone, transparent for serde, and convertible from any string type.
#[macro_export]
macro_rules! string_id {
    (
        $(#[$outer:meta])*
        $NewType:ident
    ) => {
        $(#[$outer])*
        #[derive(
            Debug,
            Hash,
            Clone,
            PartialEq,
            Eq,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::derive_more::Display,
            ::derive_more::From,
            ::derive_more::AsRef,
        )]
        #[serde(transparent)]
        #[as_ref(forward)]
        #[from(forward)]
        pub struct $NewType(::std::sync::Arc<str>);

        const _: () = {
            impl $NewType {
                #[allow(missing_docs)]
                pub fn as_str(&self) -> &str {
                    &self.0
                }

                #[allow(missing_docs)]
                pub fn is_empty(&self) -> bool {
                    self.0.is_empty()
                }
            }
        };
    };
}
