//! Small declarative helpers shared by the HTTP apps.

/// Generate a `pub fn routes(cfg: &mut ServiceConfig)` for a routes module.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     mod streams,
///     scope "/api/v1" => mod economics,
/// }
/// ```
///
/// `route` registers an actix handler, `mod` pulls in a child module's
/// `routes`, and `scope` mounts a child module under a path prefix.
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($($body:tt)*) => {
        pub fn routes(cfg: &mut ::actix_web::web::ServiceConfig) {
            $crate::__routes_body!(cfg; $($body)*);
        }
    };
}

#[cfg(feature = "actix")]
#[doc(hidden)]
#[macro_export]
macro_rules! __routes_body {
    ($cfg:ident;) => {};
    ($cfg:ident; route $handler:path $(, $($rest:tt)*)?) => {
        $cfg.service($handler);
        $crate::__routes_body!($cfg; $($($rest)*)?);
    };
    ($cfg:ident; mod $module:ident $(, $($rest:tt)*)?) => {
        $module::routes($cfg);
        $crate::__routes_body!($cfg; $($($rest)*)?);
    };
    ($cfg:ident; scope $prefix:literal => mod $module:ident $(, $($rest:tt)*)?) => {
        $cfg.service(::actix_web::web::scope($prefix).configure($module::routes));
        $crate::__routes_body!($cfg; $($($rest)*)?);
    };
}
