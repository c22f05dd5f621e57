/// Transform Module
///
/// Decodes transactions into program events. Two strategies are tried per
/// transaction:
/// 1. Instruction decoders looked up by discriminator (a fixed-width prefix of
///    the instruction data), optionally scoped to a program id
/// 2. Log pattern decoders over the program log lines, used only when no
///    instruction decoder produced an event
///
/// Both tables are open: programs register decoders at startup and nothing else
/// in the pipeline changes.
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::layout::LayoutReader;
use super::logs::LogPattern;
use super::parsers;
use crate::error::DecodeError;
use crate::models::{Block, DecodedEvent, Instruction, Payload, Transaction};

/// Decodes the bytes after the discriminator into an event payload
pub type InstructionDecodeFn =
    Arc<dyn Fn(&mut LayoutReader<'_>, &Instruction) -> Result<Payload, DecodeError> + Send + Sync>;

/// A registered instruction decoder
#[derive(Clone)]
pub struct InstructionDecoder {
    /// Restrict to one program; `None` matches the discriminator for any program
    pub program_id: Option<String>,
    pub discriminator: Vec<u8>,
    pub event_type: String,
    pub decode: InstructionDecodeFn,
}

impl InstructionDecoder {
    pub fn new(
        program_id: Option<&str>,
        discriminator: impl Into<Vec<u8>>,
        event_type: impl Into<String>,
        decode: InstructionDecodeFn,
    ) -> Self {
        Self {
            program_id: program_id.map(str::to_string),
            discriminator: discriminator.into(),
            event_type: event_type.into(),
            decode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DiscriminatorKey {
    program_id: Option<String>,
    discriminator: Vec<u8>,
}

/// Anchor-style discriminator: first 8 bytes of `sha256("<namespace>:<name>")`.
/// Instructions use the `global` namespace, events use `event`.
pub fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Deterministic key for the `ordinal`-th event of a transaction
pub fn dedup_key(signature: &str, event_type: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signature.as_bytes());
    hasher.update([0u8]);
    hasher.update(event_type.as_bytes());
    hasher.update([0u8]);
    hasher.update((ordinal as u64).to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Registry-driven transaction decoder. Stateless once built: the same
/// transaction always yields the same events with the same keys.
#[derive(Clone, Default)]
pub struct EventDecoder {
    instructions: HashMap<DiscriminatorKey, InstructionDecoder>,
    /// Registered discriminator widths, tried longest first
    widths: BTreeSet<usize>,
    log_patterns: Vec<LogPattern>,
    index_failed_transactions: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder with the System and SPL Token instruction decoders and the
    /// key-value log pattern registered
    pub fn with_builtin_decoders() -> Result<Self, regex::Error> {
        let mut decoder = Self::new();
        parsers::register_builtin(&mut decoder);
        decoder.register_log_pattern(LogPattern::key_value_events()?);
        Ok(decoder)
    }

    /// Also decode transactions that failed on-chain
    pub fn index_failed_transactions(mut self, enabled: bool) -> Self {
        self.index_failed_transactions = enabled;
        self
    }

    /// Register an instruction decoder. A later registration for the same
    /// program and discriminator replaces the earlier one.
    pub fn register_instruction(&mut self, decoder: InstructionDecoder) -> &mut Self {
        self.widths.insert(decoder.discriminator.len());
        let key = DiscriminatorKey { program_id: decoder.program_id.clone(), discriminator: decoder.discriminator.clone() };
        if self.instructions.insert(key, decoder).is_some() {
            tracing::warn!("Replaced an existing instruction decoder registration");
        }
        self
    }

    pub fn register_log_pattern(&mut self, pattern: LogPattern) -> &mut Self {
        self.log_patterns.retain(|existing| existing.id != pattern.id);
        self.log_patterns.push(pattern);
        self
    }

    pub fn instruction_decoder_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn log_pattern_count(&self) -> usize {
        self.log_patterns.len()
    }

    /// Decode every transaction of a block, preserving transaction order
    pub fn decode_block(&self, block: &Block) -> Vec<DecodedEvent> {
        block.transactions.iter().flat_map(|tx| self.decode(tx, block.height, block.timestamp)).collect()
    }

    /// Decode one transaction. Never fails: unrecognized transactions yield nothing.
    pub fn decode(&self, tx: &Transaction, height: u64, emitted_at: DateTime<Utc>) -> Vec<DecodedEvent> {
        if !tx.success && !self.index_failed_transactions {
            return Vec::new();
        }

        let mut decoded = self.decode_instructions(tx);
        if decoded.is_empty() {
            decoded = self.decode_logs(tx);
        }

        decoded
            .into_iter()
            .enumerate()
            .map(|(ordinal, (event_type, payload))| DecodedEvent {
                dedup_key: dedup_key(&tx.signature, &event_type, ordinal),
                event_type,
                height,
                signature: tx.signature.clone(),
                emitted_at,
                payload,
            })
            .collect()
    }

    fn decode_instructions(&self, tx: &Transaction) -> Vec<(String, Payload)> {
        let mut events = Vec::new();

        for (index, instruction) in tx.instructions.iter().enumerate() {
            let Some((decoder, width)) = self.lookup(instruction) else {
                continue;
            };

            let mut reader = LayoutReader::new(&instruction.raw_data[width..]);
            match (decoder.decode)(&mut reader, instruction) {
                Ok(payload) => events.push((decoder.event_type.clone(), payload)),
                Err(e) => {
                    tracing::debug!(
                        "Skipping instruction {} of {} ({} via {}): {}",
                        index,
                        tx.signature,
                        decoder.event_type,
                        instruction.program_id,
                        e
                    );
                }
            }
        }

        events
    }

    /// Program-scoped registrations win over program-agnostic ones, then the
    /// longest matching discriminator wins.
    fn lookup(&self, instruction: &Instruction) -> Option<(&InstructionDecoder, usize)> {
        for &width in self.widths.iter().rev() {
            if instruction.raw_data.len() < width {
                continue;
            }
            let prefix = &instruction.raw_data[..width];

            let scoped = DiscriminatorKey { program_id: Some(instruction.program_id.clone()), discriminator: prefix.to_vec() };
            if let Some(decoder) = self.instructions.get(&scoped) {
                return Some((decoder, width));
            }

            let any_program = DiscriminatorKey { program_id: None, discriminator: prefix.to_vec() };
            if let Some(decoder) = self.instructions.get(&any_program) {
                return Some((decoder, width));
            }
        }
        None
    }

    fn decode_logs(&self, tx: &Transaction) -> Vec<(String, Payload)> {
        tx.log_lines
            .iter()
            .filter_map(|line| self.log_patterns.iter().find_map(|pattern| pattern.apply(line)))
            .collect()
    }
}
