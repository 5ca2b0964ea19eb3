use sheetsearch::app;

/// Main entry point for the search portal.
///
/// Loads configuration from the environment and runs the web server until it
/// receives Ctrl+C or a terminate signal.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    app::run().await
}
