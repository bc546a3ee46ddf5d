pub mod account;
pub mod events;
pub mod value;

pub use account::*;
pub use events::*;
pub use value::*;
