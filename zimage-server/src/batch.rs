//! Serverless-style batch handler: JSON event in, JSON result out.
//!
//! Failures never escape as Rust errors; they come back as
//! `{error, error_type, traceback}` objects so a queue consumer can record
//! them next to the job.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use zimage_core::{encode_png_base64, Error, GenerationRequest, Loader, Pipeline};

pub const PROMPT_REQUIRED: &str = "Prompt is required";

/// Handles one `{"input": {prompt, width?, height?, steps?, seed?}}` event.
pub async fn handle<L: Loader>(pipeline: &Pipeline<L>, event: Value) -> Value {
    let input = match event.get("input") {
        Some(input) if !input.is_null() => input.clone(),
        _ => json!({}),
    };

    let has_prompt = input
        .get("prompt")
        .and_then(Value::as_str)
        .is_some_and(|prompt| !prompt.is_empty());
    if !has_prompt {
        return json!({ "error": PROMPT_REQUIRED });
    }

    let request = match serde_json::from_value::<GenerationRequest>(input) {
        Ok(request) => request,
        Err(e) => return invalid_input(&e),
    };

    match generate(pipeline, request).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("batch generation failed: {}", e.traceback());
            error_object(&e)
        }
    }
}

async fn generate<L: Loader>(
    pipeline: &Pipeline<L>,
    request: GenerationRequest,
) -> Result<Value, Error> {
    let request = request.validated()?;
    let (width, height) = (request.width, request.height);
    let image = pipeline.generate(request).await?;
    let encoded = encode_png_base64(&image)?;
    Ok(json!({
        "image": encoded,
        "format": "png",
        "width": width,
        "height": height,
    }))
}

fn error_object(e: &Error) -> Value {
    json!({
        "error": e.to_string(),
        "error_type": e.error_type(),
        "traceback": e.traceback(),
    })
}

fn invalid_input(e: &serde_json::Error) -> Value {
    json!({
        "error": format!("invalid input: {e}"),
        "error_type": "ValidationError",
        "traceback": format!("ValidationError: {e:?}"),
    })
}

/// Reads one JSON event per line and writes one JSON result per line.
/// Blank lines are skipped. Returns the number of events answered.
pub async fn process_lines<L, R, W>(
    pipeline: &Pipeline<L>,
    reader: R,
    mut writer: W,
) -> std::io::Result<usize>
where
    L: Loader,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut answered = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let output = match serde_json::from_str::<Value>(&line) {
            Ok(event) => handle(pipeline, event).await,
            Err(e) => invalid_input(&e),
        };
        writer.write_all(output.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        answered += 1;
    }
    Ok(answered)
}
