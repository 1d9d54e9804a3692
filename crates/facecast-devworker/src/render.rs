use std::path::Path;
use std::time::Duration;

/// "Renders" a clip by copying the audio to the output path.
pub async fn render(audio: &Path, output: &Path, delay: Duration) -> std::io::Result<u64> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(audio, output).await
}
