mod handle;

pub use handle::Handle;

pub const INTEGRAL_SEPARATOR: &str = "_";
