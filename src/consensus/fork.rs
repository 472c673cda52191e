//! Choice between the local chain and a competing one.
//!
//! Chains are ranked by cumulative work, `sum(16^difficulty)`. A candidate is
//! adopted only when it is valid from genesis, shares our genesis and is
//! strictly heavier; ties keep the local chain.

use crate::blockchain::Block;
use crate::validation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkDecision {
    Adopt,
    KeepLocal(&'static str),
}

/// Expected hash attempts represented by a block of `difficulty`.
pub fn block_work(difficulty: u32) -> u128 {
    16u128.saturating_pow(difficulty)
}

pub fn chain_work(chain: &[Block]) -> u128 {
    chain
        .iter()
        .skip(1)
        .fold(0u128, |acc, b| acc.saturating_add(block_work(b.difficulty)))
}

pub fn choose(local: &[Block], candidate: &[Block]) -> ForkDecision {
    match (local.first(), candidate.first()) {
        (Some(ours), Some(theirs)) if ours.hash == theirs.hash => {}
        _ => return ForkDecision::KeepLocal("different genesis"),
    }
    if !validation::is_chain_valid(candidate) {
        return ForkDecision::KeepLocal("candidate chain invalid");
    }
    if chain_work(candidate) <= chain_work(local) {
        return ForkDecision::KeepLocal("candidate not heavier");
    }
    ForkDecision::Adopt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow;
    use std::sync::atomic::AtomicU64;

    fn extend(chain: &mut Vec<Block>, producer: &str, difficulty: u32) {
        let parent = chain.last().unwrap();
        let mut block = Block::candidate(parent, producer.into(), difficulty, vec![], vec![]);
        pow::mine(&mut block, &AtomicU64::new(0), 0).unwrap();
        chain.push(block);
    }

    #[test]
    fn heavier_valid_chain_is_adopted() {
        let genesis = Block::genesis(0);
        let mut local = vec![genesis.clone()];
        extend(&mut local, "a", 1);
        let mut remote = vec![genesis];
        extend(&mut remote, "b", 1);
        extend(&mut remote, "b", 1);
        assert_eq!(choose(&local, &remote), ForkDecision::Adopt);
        assert_eq!(choose(&remote, &local), ForkDecision::KeepLocal("candidate not heavier"));
    }

    #[test]
    fn ties_keep_local() {
        let genesis = Block::genesis(0);
        let mut local = vec![genesis.clone()];
        extend(&mut local, "a", 1);
        let mut remote = vec![genesis];
        extend(&mut remote, "b", 1);
        assert_eq!(choose(&local, &remote), ForkDecision::KeepLocal("candidate not heavier"));
    }

    #[test]
    fn fewer_but_harder_blocks_win() {
        let genesis = Block::genesis(0);
        let mut local = vec![genesis.clone()];
        extend(&mut local, "a", 1);
        extend(&mut local, "a", 1);
        let mut remote = vec![genesis];
        extend(&mut remote, "b", 2);
        assert_eq!(chain_work(&local), 32);
        assert_eq!(chain_work(&remote), 256);
        assert_eq!(choose(&local, &remote), ForkDecision::Adopt);
    }

    #[test]
    fn invalid_or_foreign_chains_are_declined() {
        let genesis = Block::genesis(0);
        let local = vec![genesis.clone()];
        let mut tampered = vec![genesis];
        extend(&mut tampered, "b", 1);
        extend(&mut tampered, "b", 1);
        tampered[1].producer = "mallory".into();
        assert_eq!(choose(&local, &tampered), ForkDecision::KeepLocal("candidate chain invalid"));

        let mut foreign = vec![Block::genesis(99)];
        extend(&mut foreign, "b", 1);
        assert_eq!(choose(&local, &foreign), ForkDecision::KeepLocal("different genesis"));
    }
}
