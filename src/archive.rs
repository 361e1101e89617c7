use std::collections::HashSet;
use std::io::{Cursor, Write};

use tokio::fs;
use tracing::warn;
use zip::write::SimpleFileOptions;

use crate::error::Result;
use crate::types::{FileRecord, TransferId};

/// A built archive plus the deterministic name it should be served under.
#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub fn archive_name(transfer: &TransferId) -> String {
    format!("quickdrop-{transfer}.zip")
}

/// Bundle every completed file of a transfer into one deflate zip.
///
/// A file whose artifact has gone missing is skipped rather than failing
/// the whole download. Duplicate display names are disambiguated with the
/// record's original index so no entry silently overwrites another.
pub async fn build_archive(transfer: &TransferId, files: &[FileRecord]) -> Result<Archive> {
    let mut buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut used_names = HashSet::new();
        for record in files {
            let contents = match fs::read(&record.artifact_path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(transfer = %transfer, file = %record.name, "skipping file with missing artifact: {e}");
                    continue;
                }
            };

            let entry_name = disambiguate(&record.name, record.original_index, &mut used_names);
            zip.start_file(entry_name, options)?;
            zip.write_all(&contents)?;
        }

        zip.finish()?;
    }

    Ok(Archive {
        file_name: archive_name(transfer),
        bytes: buffer,
    })
}

/// First occurrence keeps the sender's name; later duplicates get the
/// original index spliced in before the extension ("a.txt" -> "a (2).txt"),
/// counting upward until the candidate is free so a repeated index or a
/// literal "a (2).txt" in the same transfer can't overwrite an entry.
fn disambiguate(name: &str, index: u32, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    let mut n = index;
    let mut candidate = format!("{stem} ({n}){ext}");
    while !used.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{stem} ({n}){ext}");
    }
    candidate
}
