use chroma_error::{ChromaError, ErrorCodes};
use std::io::Cursor;
use thiserror::Error;

use murmur3::murmur3_x64_128;

/// A trait for hashing a member and a key to a score.
pub trait Hasher {
    fn hash(&self, member: &str, key: &str) -> Result<u64, AssignmentError>;
    /// Assign a key to members using the rendezvous (highest random weight) algorithm
    /// # Arguments
    /// - members: The members to assign to.
    /// - key: The key to assign.
    /// - k: How many members to return.
    /// # Returns
    /// The k members with the highest score for the key, highest first.
    /// # Errors
    /// - If the key is empty.
    /// - If there are insufficient members to assign to.
    /// - If there is an error hashing a member.
    fn assign(
        &self,
        members: impl IntoIterator<Item = impl AsRef<str>>,
        key: &str,
        k: usize,
    ) -> Result<Vec<String>, AssignmentError> {
        if key.is_empty() {
            return Err(AssignmentError::EmptyKey);
        }
        let mut member_vec = members
            .into_iter()
            .map(|m| {
                self.hash(m.as_ref(), key)
                    .map(|s| (s, m.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if member_vec.len() < k {
            return Err(AssignmentError::InsufficientMember(k, member_vec.len()));
        }

        // Ties are broken on the member name so the result never depends on input order.
        member_vec.sort_by(|(score_a, member_a), (score_b, member_b)| {
            score_b.cmp(score_a).then_with(|| member_a.cmp(member_b))
        });
        Ok(member_vec.into_iter().take(k).map(|(_, m)| m).collect())
    }

    fn assign_one(
        &self,
        members: impl IntoIterator<Item = impl AsRef<str>>,
        key: &str,
    ) -> Result<String, AssignmentError> {
        self.assign(members, key, 1)?
            .pop()
            .ok_or(AssignmentError::InsufficientMember(1, 0))
    }
}

/// Error codes for assignment
#[derive(Error, Debug)]
pub enum AssignmentError {
    #[error("Cannot assign empty key")]
    EmptyKey,
    #[error("Insufficient members: requested {0}, available {1}")]
    InsufficientMember(usize, usize),
    #[error("Error hashing member")]
    HashError,
}

impl ChromaError for AssignmentError {
    fn code(&self) -> ErrorCodes {
        match self {
            AssignmentError::EmptyKey => ErrorCodes::InvalidArgument,
            AssignmentError::InsufficientMember(_, _) => ErrorCodes::FailedPrecondition,
            AssignmentError::HashError => ErrorCodes::Internal,
        }
    }
}

fn merge_hashes(x: u64, y: u64) -> u64 {
    let mut acc = x ^ y;
    acc ^= acc >> 33;
    acc = acc.wrapping_mul(0xFF51AFD7ED558CCD);
    acc ^= acc >> 33;
    acc = acc.wrapping_mul(0xC4CEB9FE1A85EC53);
    acc ^= acc >> 33;
    acc
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Hasher {}

impl Hasher for Murmur3Hasher {
    fn hash(&self, member: &str, key: &str) -> Result<u64, AssignmentError> {
        let member_hash = murmur3_x64_128(&mut Cursor::new(member), 0)
            .map_err(|_| AssignmentError::HashError)?;
        let key_hash =
            murmur3_x64_128(&mut Cursor::new(key), 0).map_err(|_| AssignmentError::HashError)?;
        // Only the low 64 bits of each 128 bit digest take part in the score.
        Ok(merge_hashes(member_hash as u64, key_hash as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockHasher {}

    impl Hasher for MockHasher {
        fn hash(&self, member: &str, _key: &str) -> Result<u64, AssignmentError> {
            match member {
                "a" => Ok(1),
                "b" => Ok(2),
                "c" => Ok(3),
                "c2" => Ok(3),
                _ => Err(AssignmentError::HashError),
            }
        }
    }

    #[test]
    fn test_assign_picks_highest_score() {
        let hasher = MockHasher {};
        let member = hasher.assign_one(["a", "b", "c"], "key").unwrap();
        assert_eq!(member, "c");
        let top_two = hasher.assign(["a", "b", "c"], "key", 2).unwrap();
        assert_eq!(top_two, vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_assign_tie_is_order_independent() {
        let hasher = MockHasher {};
        assert_eq!(hasher.assign_one(["c2", "c", "a"], "key").unwrap(), "c");
        assert_eq!(hasher.assign_one(["a", "c", "c2"], "key").unwrap(), "c");
    }

    #[test]
    fn test_assign_errors() {
        let hasher = MockHasher {};
        assert!(matches!(
            hasher.assign_one(["a"], ""),
            Err(AssignmentError::EmptyKey)
        ));
        assert!(matches!(
            hasher.assign(["a", "b"], "key", 3),
            Err(AssignmentError::InsufficientMember(3, 2))
        ));
        assert!(matches!(
            hasher.assign_one(Vec::<String>::new(), "key"),
            Err(AssignmentError::InsufficientMember(1, 0))
        ));
        assert!(matches!(
            hasher.assign_one(["a", "zzz"], "key"),
            Err(AssignmentError::HashError)
        ));
    }

    #[test]
    fn test_even_distribution() {
        let member_count = 10;
        let tolerance = 40;
        let hasher = Murmur3Hasher {};
        let nodes = (0..member_count)
            .map(|i| format!("member{}", i))
            .collect::<Vec<_>>();

        let mut counts = vec![0i32; member_count];
        let num_keys = 1000;
        for i in 0..num_keys {
            let key = format!("key_{}", i);
            let member = hasher.assign_one(&nodes, &key).unwrap();
            let index = nodes.iter().position(|x| *x == member).unwrap();
            counts[index] += 1;
        }

        let expected = (num_keys / member_count) as i32;
        for count in counts {
            assert!((count - expected).abs() < tolerance);
        }
    }

    #[test]
    fn test_removing_a_member_only_moves_its_keys() {
        let hasher = Murmur3Hasher {};
        let all = (0..8).map(|i| format!("shard{}", i)).collect::<Vec<_>>();
        let fewer = all[..7].to_vec();
        for i in 0..500 {
            let key = format!("collection_{}", i);
            let before = hasher.assign_one(&all, &key).unwrap();
            let after = hasher.assign_one(&fewer, &key).unwrap();
            if before != "shard7" {
                assert_eq!(before, after);
            }
        }
    }
}
