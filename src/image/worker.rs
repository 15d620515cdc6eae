//! Worker side of the subprocess sandbox.
//!
//! `emote-manager resize` / `emote-manager convert` read an image from stdin,
//! write the result to stdout, and report through the exit code:
//! 0 on success, [`INVALID_IMAGE_EXIT_CODE`] for undecodable input, 1 for
//! anything else (with details on stderr).

use std::io::{Read, Write};

use tracing::error;

use crate::common::EmoteError;

use super::{ImageBlob, Operation};

/// Exit code reserved for "the input was not a usable image".
pub const INVALID_IMAGE_EXIT_CODE: i32 = 2;

const FAILURE_EXIT_CODE: i32 = 1;

/// Run one job against the process's standard streams.
pub fn run(operation: &str) -> i32 {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_with(operation, stdin.lock(), stdout.lock())
}

/// Run one job, reading the image from `input` and writing to `output`.
pub fn run_with(operation: &str, mut input: impl Read, mut output: impl Write) -> i32 {
    let Some(operation) = Operation::from_arg(operation) else {
        error!("unknown image operation '{}'", operation);
        return FAILURE_EXIT_CODE;
    };

    let mut data = Vec::new();
    if let Err(e) = input.read_to_end(&mut data) {
        error!("failed to read image from stdin: {}", e);
        return FAILURE_EXIT_CODE;
    }

    let result = ImageBlob::new(data).and_then(|image| operation.apply(&image));
    match result {
        Ok(image) => {
            if let Err(e) = output.write_all(image.data()).and_then(|_| output.flush()) {
                error!("failed to write image to stdout: {}", e);
                return FAILURE_EXIT_CODE;
            }
            0
        }
        Err(EmoteError::InvalidImage) => INVALID_IMAGE_EXIT_CODE,
        Err(e) => {
            error!("{} failed: {}", operation, e);
            FAILURE_EXIT_CODE
        }
    }
}
