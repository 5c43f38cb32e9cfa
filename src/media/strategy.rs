use super::types::Extraction;
use async_trait::async_trait;
use tracing::{debug, info};

/// One self-contained extraction technique. `C` is the per-request context
/// the resolver builds (post URL, parsed IDs, fetch helpers).
#[async_trait]
pub trait Strategy<C: Sync>: Send + Sync {
    /// Human-readable name of the strategy
    fn name(&self) -> &'static str;

    /// Try to extract sources. Failures are swallowed and reported as an
    /// empty extraction so the chain can move on.
    async fn extract(&self, ctx: &C) -> Extraction;
}

/// Runs strategies in order and stops at the first one that yields sources.
/// A title seen on an earlier, empty step is kept when the winner has none;
/// when every step comes back empty the last title seen is returned.
pub async fn run_chain<C: Sync>(
    provider: &str,
    ctx: &C,
    strategies: &[Box<dyn Strategy<C>>],
) -> Extraction {
    let mut title = None;

    for strategy in strategies {
        debug!("{}: trying {}", provider, strategy.name());
        let extraction = strategy.extract(ctx).await;

        if !extraction.is_empty() {
            info!(
                "{}: {} found {} source(s)",
                provider,
                strategy.name(),
                extraction.sources.len()
            );
            return Extraction {
                title: extraction.title.or(title),
                sources: extraction.sources,
            };
        }

        debug!("{}: {} found nothing", provider, strategy.name());
        if extraction.title.is_some() {
            title = extraction.title;
        }
    }

    Extraction::titled(title)
}
