//! Stream-copy join through ffmpeg's concat demuxer.

use super::ffmpeg::{piped_command, push_progress_and_output};
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;

/// Arguments that copy every file named in `list` into `output` without re-encoding.
pub fn build_concat_args(list: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-f".into(),
        "concat".into(),
        // list entries are absolute paths
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.as_os_str().to_os_string(),
        "-c".into(),
        "copy".into(),
    ];
    push_progress_and_output(&mut args, output);
    args
}

pub fn build_concat_command(program: &Path, list: &Path, output: &Path) -> Command {
    piped_command(program, build_concat_args(list, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::PROGRESS_TARGET;

    #[test]
    fn test_concat_args_copy_streams() {
        let list = Path::new("/clips/concat_list.txt");
        let args = build_concat_args(list, Path::new("/clips/joined.mp4"));
        let args: Vec<&str> = args.iter().filter_map(|a| a.to_str()).collect();

        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/clips/concat_list.txt",
                "-c",
                "copy",
                "-progress",
                PROGRESS_TARGET,
                "-nostats",
                "-y",
                "/clips/joined.mp4",
            ]
        );
    }
}
