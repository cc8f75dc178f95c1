pub mod scim;

pub use scim::scim_routes;
