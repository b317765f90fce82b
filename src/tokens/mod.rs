mod registry;

pub use registry::TokenRegistry;
