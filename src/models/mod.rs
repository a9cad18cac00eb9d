// Jukebox Models
// Data structures for the application

mod donation;
mod settings;
mod video;

pub use donation::*;
pub use settings::*;
pub use video::*;
