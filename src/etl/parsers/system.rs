/// System Program Instruction Parser
///
/// Decodes instructions of the Solana System Program (11111111111111111111111111111111).
/// The program prefixes its instruction data with a u32 little-endian variant index.
use std::sync::Arc;

use crate::etl::layout::LayoutReader;
use crate::etl::transform::{EventDecoder, InstructionDecoder};
use crate::error::DecodeError;
use crate::models::{Instruction, Payload};

pub const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

const CREATE_ACCOUNT: [u8; 4] = 0u32.to_le_bytes();
const TRANSFER: [u8; 4] = 2u32.to_le_bytes();

pub fn register(decoder: &mut EventDecoder) {
    decoder
        .register_instruction(InstructionDecoder::new(Some(SYSTEM_PROGRAM), TRANSFER, "SolTransfer", Arc::new(parse_transfer)))
        .register_instruction(InstructionDecoder::new(
            Some(SYSTEM_PROGRAM),
            CREATE_ACCOUNT,
            "SolCreateAccount",
            Arc::new(parse_create_account),
        ));
}

/// Transfer { lamports: u64 }; accounts: [from, to]
pub fn parse_transfer(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let lamports = reader.read_u64()?;

    let mut payload = Payload::new();
    payload.insert("lamports".into(), lamports.into());
    payload.insert("from".into(), ix.account(0)?.into());
    payload.insert("to".into(), ix.account(1)?.into());
    Ok(payload)
}

/// CreateAccount { lamports: u64, space: u64, owner: Pubkey }; accounts: [funder, new_account]
pub fn parse_create_account(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let lamports = reader.read_u64()?;
    let space = reader.read_u64()?;
    let owner = reader.read_pubkey()?;

    let mut payload = Payload::new();
    payload.insert("lamports".into(), lamports.into());
    payload.insert("space".into(), space.into());
    payload.insert("owner".into(), owner.into());
    payload.insert("funder".into(), ix.account(0)?.into());
    payload.insert("account".into(), ix.account(1)?.into());
    Ok(payload)
}
