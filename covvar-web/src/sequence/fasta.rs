//! FASTA validation.

use bio::io::fasta;

use crate::{Error, Result};

/// Parse `text` as FASTA and return the number of records.
///
/// Fails when no record is found, when the text is not FASTA, or when it holds
/// more than `max_sequences` records.
pub fn validate_fasta(text: &str, max_sequences: usize) -> Result<usize> {
    let count = count_records(text)?;
    if count == 0 {
        return Err(Error::validation("No valid sequences found in FASTA format"));
    }
    if count > max_sequences {
        return Err(Error::validation(format!(
            "Too many sequences. Maximum is {max_sequences}"
        )));
    }
    Ok(count)
}

fn count_records(text: &str) -> Result<usize> {
    let reader = fasta::Reader::new(text.trim_start().as_bytes());

    let mut count = 0;
    for record in reader.records() {
        let record =
            record.map_err(|e| Error::validation(format!("Invalid FASTA format: {e}")))?;
        record
            .check()
            .map_err(|e| Error::validation(format!("Invalid FASTA format: {e}")))?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE: &str = ">seq1 spike\nMFVFLVLLPLVSSQ\n>seq2\nMKVLAAGIVG\nLLLA\n>seq3\nMSTNPKPQRK\n";

    #[test]
    fn test_counts_records() {
        assert_eq!(validate_fasta(THREE, 1000).unwrap(), 3);
        assert_eq!(validate_fasta(&format!("\n\n{THREE}"), 1000).unwrap(), 3);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = validate_fasta("   \n", 1000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: No valid sequences found in FASTA format"
        );
    }

    #[test]
    fn test_non_fasta_rejected() {
        let err = validate_fasta("ACGT\nACGT\n", 1000).unwrap_err();
        assert!(err.to_string().contains("Invalid FASTA format"));
    }

    #[test]
    fn test_sequence_limit() {
        let err = validate_fasta(THREE, 2).unwrap_err();
        assert!(err.to_string().contains("Too many sequences. Maximum is 2"));
        assert!(validate_fasta(THREE, 3).is_ok());
    }
}
