use crate::error::{Result, SourcingError};

/// Default number of companies per preview query.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Partition companies into ordered groups of `batch_size`. The last group
/// holds the remainder and is never padded or dropped.
///
/// Smaller groups surface more distinct companies inside the capped result
/// window of a single preview query; larger ones finish discovery in fewer
/// queries.
pub fn split_into_batches(companies: &[String], batch_size: usize) -> Result<Vec<Vec<String>>> {
    if companies.is_empty() {
        return Err(SourcingError::InvalidBatchConfig(
            "company list is empty".to_string(),
        ));
    }
    if batch_size == 0 {
        return Err(SourcingError::InvalidBatchConfig(
            "batch size must be at least 1".to_string(),
        ));
    }

    Ok(companies
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn seven_companies_in_fives_gives_remainder_batch() {
        let batches = split_into_batches(&names(&["A", "B", "C", "D", "E", "F", "G"]), 5).unwrap();
        assert_eq!(
            batches,
            vec![names(&["A", "B", "C", "D", "E"]), names(&["F", "G"])]
        );
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let batches = split_into_batches(&names(&["A", "B", "C", "D"]), 2).unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 2));
    }

    #[test]
    fn batch_larger_than_list_gives_single_batch() {
        let batches = split_into_batches(&names(&["A", "B"]), DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(batches, vec![names(&["A", "B"])]);
    }

    #[test]
    fn order_is_preserved() {
        let input = names(&["Zeta", "Alpha", "Mu"]);
        let flat: Vec<String> = split_into_batches(&input, 1)
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(flat, input);
    }

    #[test]
    fn empty_list_is_invalid() {
        let err = split_into_batches(&[], 5).unwrap_err();
        assert!(matches!(err, SourcingError::InvalidBatchConfig(_)));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let err = split_into_batches(&names(&["A"]), 0).unwrap_err();
        assert!(matches!(err, SourcingError::InvalidBatchConfig(_)));
    }
}
