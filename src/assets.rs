pub mod decode;

pub use decode::{PreparedImage, decode_avatar};
