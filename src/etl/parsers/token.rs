/// SPL Token Program Instruction Parser
///
/// Decodes instructions from the SPL Token Program and Token-2022 Program.
/// Both share the same one-byte instruction tag layout for the variants below.
use std::sync::Arc;

use crate::etl::layout::LayoutReader;
use crate::etl::transform::{EventDecoder, InstructionDecoder};
use crate::error::DecodeError;
use crate::models::{Instruction, Payload};

pub const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

const TRANSFER: u8 = 3;
const MINT_TO: u8 = 7;
const BURN: u8 = 8;
const TRANSFER_CHECKED: u8 = 12;

pub fn register(decoder: &mut EventDecoder) {
    for program in [TOKEN_PROGRAM, TOKEN_2022_PROGRAM] {
        decoder
            .register_instruction(InstructionDecoder::new(Some(program), [TRANSFER], "TokenTransfer", Arc::new(parse_transfer)))
            .register_instruction(InstructionDecoder::new(
                Some(program),
                [TRANSFER_CHECKED],
                "TokenTransfer",
                Arc::new(parse_transfer_checked),
            ))
            .register_instruction(InstructionDecoder::new(Some(program), [MINT_TO], "TokenMintTo", Arc::new(parse_mint_to)))
            .register_instruction(InstructionDecoder::new(Some(program), [BURN], "TokenBurn", Arc::new(parse_burn)));
    }
}

/// Transfer { amount: u64 }; accounts: [source, destination, authority]
///
/// The plain transfer does not name the mint, so `mint` is left out.
pub fn parse_transfer(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let amount = reader.read_u64()?;

    let mut payload = Payload::new();
    payload.insert("amount".into(), amount.into());
    payload.insert("source".into(), ix.account(0)?.into());
    payload.insert("destination".into(), ix.account(1)?.into());
    payload.insert("authority".into(), ix.account(2)?.into());
    Ok(payload)
}

/// TransferChecked { amount: u64, decimals: u8 }; accounts: [source, mint, destination, authority]
pub fn parse_transfer_checked(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let amount = reader.read_u64()?;
    let decimals = reader.read_u8()?;

    let mut payload = Payload::new();
    payload.insert("amount".into(), amount.into());
    payload.insert("decimals".into(), decimals.into());
    payload.insert("source".into(), ix.account(0)?.into());
    payload.insert("mint".into(), ix.account(1)?.into());
    payload.insert("destination".into(), ix.account(2)?.into());
    payload.insert("authority".into(), ix.account(3)?.into());
    Ok(payload)
}

/// MintTo { amount: u64 }; accounts: [mint, account, authority]
pub fn parse_mint_to(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let amount = reader.read_u64()?;

    let mut payload = Payload::new();
    payload.insert("amount".into(), amount.into());
    payload.insert("mint".into(), ix.account(0)?.into());
    payload.insert("account".into(), ix.account(1)?.into());
    payload.insert("authority".into(), ix.account(2)?.into());
    Ok(payload)
}

/// Burn { amount: u64 }; accounts: [account, mint, authority]
pub fn parse_burn(reader: &mut LayoutReader<'_>, ix: &Instruction) -> Result<Payload, DecodeError> {
    let amount = reader.read_u64()?;

    let mut payload = Payload::new();
    payload.insert("amount".into(), amount.into());
    payload.insert("account".into(), ix.account(0)?.into());
    payload.insert("mint".into(), ix.account(1)?.into());
    payload.insert("authority".into(), ix.account(2)?.into());
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Transaction;
    use chrono::Utc;

    fn token_ix(program: &str, data: Vec<u8>, accounts: &[&str]) -> Instruction {
        Instruction {
            program_id: program.into(),
            raw_data: data,
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn decode(ix: Instruction) -> Vec<crate::models::DecodedEvent> {
        let mut decoder = EventDecoder::new();
        register(&mut decoder);
        let tx = Transaction { signature: "sig".into(), instructions: vec![ix], log_lines: vec![], success: true };
        decoder.decode(&tx, 1, Utc::now())
    }

    #[test]
    fn test_parse_token_transfer() {
        let mut data = vec![TRANSFER];
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        let events = decode(token_ix(
            TOKEN_PROGRAM,
            data,
            &["TokenAccount1111111111111111111111111", "TokenAccount2222222222222222222222222", "Authority1"],
        ));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "TokenTransfer");
        assert_eq!(events[0].payload["amount"], 1_000_000);
        assert_eq!(events[0].payload["source"], "TokenAccount1111111111111111111111111");
        assert_eq!(events[0].payload["destination"], "TokenAccount2222222222222222222222222");
    }

    #[test]
    fn test_parse_token_transfer_checked_2022() {
        let mut data = vec![TRANSFER_CHECKED];
        data.extend_from_slice(&5000u64.to_le_bytes());
        data.push(6);
        let events = decode(token_ix(
            TOKEN_2022_PROGRAM,
            data,
            &["Source", "MintAddress11111111111111111111111111", "Dest", "Owner"],
        ));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["amount"], 5000);
        assert_eq!(events[0].payload["decimals"], 6);
        assert_eq!(events[0].payload["mint"], "MintAddress11111111111111111111111111");
    }

    #[test]
    fn test_parse_mint_and_burn() {
        let mut mint = vec![MINT_TO];
        mint.extend_from_slice(&10u64.to_le_bytes());
        let events = decode(token_ix(TOKEN_PROGRAM, mint, &["Mint", "Account", "Authority"]));
        assert_eq!(events[0].event_type, "TokenMintTo");

        let mut burn = vec![BURN];
        burn.extend_from_slice(&4u64.to_le_bytes());
        let events = decode(token_ix(TOKEN_PROGRAM, burn, &["Account", "Mint", "Authority"]));
        assert_eq!(events[0].event_type, "TokenBurn");
        assert_eq!(events[0].payload["mint"], "Mint");
    }

    #[test]
    fn test_truncated_transfer_checked_skipped() {
        let mut data = vec![TRANSFER_CHECKED];
        data.extend_from_slice(&5000u64.to_le_bytes());

        assert!(decode(token_ix(TOKEN_PROGRAM, data, &["S", "M", "D", "O"])).is_empty());
    }
}
