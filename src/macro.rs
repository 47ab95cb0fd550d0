/// Macro for declaring the permission set a module advertises at load time.
///
/// Generates a module with one path constant per permission and a `declare`
/// function building the catalog entries for the domain the module was loaded
/// under. Register the result with
/// [`PermissionManager::register_permissions`](crate::PermissionManager::register_permissions).
///
/// Example usage:
/// ```
/// use permcrab::{Domain, declare_permissions};
///
/// declare_permissions! {
///     /// Inventory permissions
///     pub permissions Inventory {
///         GIVE = "inventory.give" => "Give items to players",
///         CLEAR = "inventory.clear" => "Clear a player's inventory",
///     }
/// }
///
/// assert_eq!(Inventory::GIVE, "inventory.give");
/// let declared = Inventory::declare(&Domain::Core);
/// assert_eq!(declared.len(), 2);
/// assert_eq!(declared[1].to_string(), "core::inventory.clear");
/// assert_eq!(declared[0].description(), Some("Give items to players"));
/// ```
#[macro_export]
macro_rules! declare_permissions {
    (
        $(#[$meta:meta])*
        $vis:vis permissions $set:ident {
            $(
                $(#[$perm_meta:meta])*
                $name:ident = $path:literal => $description:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        $vis mod $set {
            $(
                $(#[$perm_meta])*
                pub const $name: &str = $path;
            )*

            /// Every path in this set, in declaration order.
            #[allow(unused)]
            pub const ALL: &[&str] = &[$($path,)*];

            /// Catalog entries of this set under `domain`.
            pub fn declare(domain: &$crate::Domain) -> ::std::vec::Vec<$crate::Permission> {
                ::std::vec![
                    $(
                        $crate::Permission::new(domain.clone(), $path).with_description($description),
                    )*
                ]
            }
        }
    };
}
