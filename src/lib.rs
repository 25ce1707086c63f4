pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod scheduler;
pub mod source;
pub mod processing {
    pub mod convert;
    pub mod fit;
    pub mod guard;
    pub mod layout;
    pub mod resize;
}
pub mod render {
    pub mod viewer;
}
