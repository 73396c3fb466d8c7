use crate::args::ServeArgs;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::server::{self, Backend};
use crate::Result;

/// Runs the bills backend until ctrl-c. Records are held in memory and are gone when it stops.
pub async fn serve(args: ServeArgs) -> Result<Out<()>> {
    let mut backend = Backend::new(args.token().map(str::to_string));
    if args.seed() {
        backend = backend.seeded();
    }
    server::serve(args.addr(), backend)
        .await
        .pub_result(ErrorType::Service)?;
    Ok(format!("Stopped serving at {}", args.addr()).into())
}
