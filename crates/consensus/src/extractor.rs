//! Settlement blocks embedded in DA blocks

use da_bridge::{AppId, CallIndex, DaBlock};
use settlement_primitives::SettlementBlock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The DA block carries nothing for this application. Expected most ticks.
    #[error("no settlement payload in DA block {0}")]
    NotFound(u64),

    /// Every matching payload failed to decode
    #[error("{count} settlement payload(s) in DA block {number} are malformed: {first}")]
    Decode {
        number: u64,
        count: usize,
        first: String,
    },
}

/// A matching extrinsic whose payload is not a settlement block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPayload {
    /// Position of the extrinsic in the DA block
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Decoded blocks in DA order
    pub blocks: Vec<SettlementBlock>,
    /// Matching payloads that failed to decode alongside the good ones
    pub malformed: Vec<MalformedPayload>,
}

/// Pull every settlement block submitted under `app_id` through `call_index`.
///
/// Pure: the same DA block always yields the same result.
pub fn extract(
    block: &DaBlock,
    app_id: AppId,
    call_index: CallIndex,
) -> Result<Extracted, ExtractError> {
    let mut extracted = Extracted::default();
    let mut matched = 0usize;

    for (index, ext) in block.extrinsics.iter().enumerate() {
        if !ext.matches(app_id, call_index) {
            continue;
        }
        matched += 1;

        match SettlementBlock::from_bytes(&ext.data) {
            Ok(blk) => extracted.blocks.push(blk),
            Err(e) => extracted.malformed.push(MalformedPayload {
                index,
                reason: e.to_string(),
            }),
        }
    }

    if matched == 0 {
        return Err(ExtractError::NotFound(block.number));
    }

    if extracted.blocks.is_empty() {
        return Err(ExtractError::Decode {
            number: block.number,
            count: extracted.malformed.len(),
            first: extracted
                .malformed
                .first()
                .map(|m| m.reason.clone())
                .unwrap_or_default(),
        });
    }

    Ok(extracted)
}
