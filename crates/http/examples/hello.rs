use async_trait::async_trait;
use http::StatusCode;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use ember_http::handler::{HandlerError, ServiceHandler};
use ember_http::protocol::EngineError;
use ember_http::request::Request;
use ember_http::server::Server;

struct HelloService;

#[async_trait(?Send)]
impl ServiceHandler for HelloService {
    type ThreadData = ();

    fn create_thread_data(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_url(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
        info!(path = request.path(), "incoming request");
        match request.path() {
            "/hello" => request.write_simple_response(None, None, b"hi").await?,
            "/stream" => {
                request.start_chunked(Some("text/plain")).await?;
                for part in ["one\n", "two\n", "three\n"] {
                    request.send_chunk(part.as_bytes()).await?;
                }
                request.finish_chunked().await?;
            }
            _ => {
                request
                    .write_simple_response(Some(StatusCode::NOT_FOUND), None, b"not found")
                    .await?
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), EngineError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let server = Server::tcp(8080, HelloService).threads(4).build()?;
    info!(addr = ?server.local_addr(), "listening");
    server.run()?;
    Ok(())
}
