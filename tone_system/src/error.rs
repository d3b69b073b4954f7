use std::time::Duration;

error_set::error_set! {
    AnalysisError = {
        #[display("No emotion model is loaded")]
        ModelNotLoaded,
        #[display("The audio is too quiet to analyse")]
        AudioTooQuiet,
    } || AudioDecodeError || EyreError;

    AudioDecodeError = {
        #[display("The uploaded audio was empty")]
        EmptyPayload,
        #[display("Could not decode the audio ({native}) and transcoding it failed: {transcode}")]
        Undecodable {
            native: String,
            transcode: TranscodeError,
        },
        #[display("The transcoded audio could not be decoded: {reason}")]
        TranscodedUnreadable {
            reason: String,
        },
        #[display("The audio could not be processed: {reason}")]
        Unprocessable {
            reason: String,
        },
        #[display("Could not stage the uploaded audio: {0}")]
        Staging(std::io::Error),
    };

    TranscodeError = {
        #[display("Could not start ffmpeg: {message}")]
        Spawn {
            message: String,
        },
        #[display("ffmpeg did not finish within {after:?}")]
        Timeout {
            after: Duration,
        },
        #[display("ffmpeg exited with {status}: {stderr}")]
        Failed {
            status: String,
            stderr: String,
        },
        #[display("Lost track of the ffmpeg process: {0}")]
        Io(std::io::Error),
    };

    EyreError = {
        #[display("Internal error, please submit a bug report: {0}")]
        Other(eyre::Error)
    };
}
