/// Parsers Module
///
/// Contains instruction decoders for well-known Solana programs.
/// Each parser reads one instruction variant's binary layout into an event payload.
pub mod system;
pub mod token;

use super::transform::EventDecoder;

/// Register every built-in program decoder
pub fn register_builtin(decoder: &mut EventDecoder) {
    system::register(decoder);
    token::register(decoder);
}
