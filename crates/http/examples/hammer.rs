use async_trait::async_trait;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use ember_http::handler::{HandlerError, ServiceHandler};
use ember_http::protocol::EngineError;
use ember_http::request::Request;
use ember_http::server::Server;

struct NullService;

#[async_trait(?Send)]
impl ServiceHandler for NullService {
    type ThreadData = ();

    fn create_thread_data(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_url(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
        request.write_simple_response(None, None, b"ok").await?;
        Ok(())
    }
}

fn main() -> Result<(), EngineError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let urls = vec!["/a".to_string(), "/b".to_string(), "/c".to_string()];
    let server = Server::hammer(urls, 10_000, NullService).threads(4).build()?;
    let report = server.run()?;

    let hammer = report.hammer.unwrap_or_default();
    let rate = hammer.requests as f64 / hammer.elapsed.as_secs_f64().max(f64::EPSILON);
    info!(requests = hammer.requests, elapsed = ?hammer.elapsed, rate, "hammer finished");
    Ok(())
}
