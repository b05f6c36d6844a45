//! Argument construction for the external encoder

pub mod concat;
pub mod ffmpeg;

pub use concat::{build_concat_args, build_concat_command};
pub use ffmpeg::{build_args, build_command, PROGRESS_TARGET};
