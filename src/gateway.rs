//! One lazy, per-topic sequence of decoded position events, built the same
//! way `dex_sdk::stream::raw` folds `get_logs` into a continuous stream:
//! `futures::stream::unfold` over successive single-block filters, with a
//! retry loop for "block not available yet".

use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use futures::{Stream, stream};

use crate::error::ChainError;
use crate::types::{Envelope, EventId};

/// Decodes every log in one block into `T` via `decode`, skipping logs
/// that fail to decode as the target event (a different topic0 sharing
/// the same filter would never happen here since each gateway only
/// watches one event's topic0, but defensive decoding keeps a single bad
/// log from poisoning a whole block).
pub fn watch_topic<P, E, T, S, SFut>(
    provider: P,
    contract_address: Address,
    from_block: u64,
    decode: impl Fn(E) -> T + Copy + Send + 'static,
    sleep: S,
) -> impl Stream<Item = Result<Vec<Envelope<T>>, ChainError>>
where
    P: Provider + Clone,
    E: SolEvent + Send + 'static,
    T: Send + 'static,
    S: Fn(Duration) -> SFut + Copy,
    SFut: Future<Output = ()>,
{
    stream::unfold((provider, from_block), move |(provider, mut block_num)| async move {
        let filter = Filter::new()
            .address(contract_address)
            .event_signature(E::SIGNATURE_HASH)
            .from_block(block_num)
            .to_block(block_num);

        loop {
            let result = futures::try_join!(provider.get_block_number(), provider.get_logs(&filter))
                .map_err(ChainError::from)
                .and_then(|(head_block_num, logs)| {
                    if head_block_num < block_num {
                        return Err(ChainError::Transport("block is not available yet".into()));
                    }
                    let mut events = Vec::with_capacity(logs.len());
                    for log in &logs {
                        let decoded = E::decode_log(&log.inner).map_err(|e| ChainError::Decode(e.to_string()))?;
                        let id = EventId::new(
                            log.block_number.unwrap_or(block_num),
                            log.transaction_hash.unwrap_or_default(),
                            log.log_index.unwrap_or_default(),
                        );
                        events.push(Envelope::new(id, decode(decoded.data)));
                    }
                    Ok(events)
                });

            match result {
                Ok(events) => {
                    block_num += 1;
                    return Some((Ok(events), (provider, block_num)));
                }
                Err(ChainError::Transport(ref msg)) if msg == "block is not available yet" => {
                    sleep(provider.client().poll_interval()).await;
                    continue;
                }
                Err(e) => return Some((Err(e), (provider, block_num))),
            }
        }
    })
}
