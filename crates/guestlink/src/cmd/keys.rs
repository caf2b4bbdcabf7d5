use guestlink_frame::{key_for, Address, EntityKind, Substream};

use crate::cmd::KeysArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_keys, OutputFormat};

pub fn run(args: KeysArgs, format: OutputFormat) -> CliResult<i32> {
    let kinds = match args.kind {
        Some(kind) => vec![EntityKind::from(kind)],
        None => EntityKind::ALL.to_vec(),
    };
    let addresses = addresses(&kinds, args.index)?;
    print_keys(&addresses, format);
    Ok(SUCCESS)
}

fn addresses(kinds: &[EntityKind], index: u32) -> CliResult<Vec<Address>> {
    let mut out = Vec::with_capacity(kinds.len() * Substream::ALL.len());
    for &kind in kinds {
        for substream in Substream::ALL {
            let key = key_for(kind, index, substream)
                .map_err(|err| frame_error("invalid address", err))?;
            out.push(Address::from_key(key).map_err(|err| frame_error("invalid key", err))?);
        }
    }
    Ok(out)
}
