mod core;

pub use self::core::{array_pass, redimension_worker};
