//! Word Overlap Model
//!
//! Pure functions scoring the similarity of two ranked word summaries. Positions are
//! reversed ranks: in a summary of `n` words the first word sits at position `n` and
//! the last at position 1, so earlier words weigh more.

use super::types::{EventWordWeight, WordId, WordWeight, WordWeightMap};
use std::collections::HashMap;

const PW_POWER: f64 = 1.1;
const FIRST_WORD_FACTOR: f64 = 1.75;
const PENALTY_FACTOR: usize = 5;

pub fn pw(val: usize) -> f64 {
    (val as f64).powf(PW_POWER)
}

pub fn pw_mult(val1: usize, val2: usize) -> f64 {
    pw(val1) * pw(val2)
}

/// Overlap of two summaries of the given lengths sharing every word in the same order.
pub fn max_overlap(len1: usize, len2: usize) -> f64 {
    let mut len_short = len1.min(len2);
    let mut len_long = len1.max(len2);
    let mut sum = 0.0;

    while len_short > 0 {
        sum += pw_mult(len_short, len_long);
        len_short -= 1;
        len_long -= 1;
    }

    sum
}

pub fn offset_penalty(offset: usize) -> usize {
    offset * (offset + 1) / 2 * PENALTY_FACTOR
}

/// Weight of the word at `index` in a ranked list of `count` core words.
///
/// Lists shorter than `max_count` are stretched to the full scale so a short message
/// does not lose to a long one just by length.
pub fn core_word_weight(index: u32, count: u32, max_count: u32) -> u64 {
    let rank = count.saturating_sub(index);

    let res = if count < max_count && count > 0 {
        let scaled = (max_count as f64 * rank as f64 / count as f64 + 0.5) as usize;
        pw(scaled)
    } else {
        pw(rank as usize)
    };

    let res = if index == 0 { res * FIRST_WORD_FACTOR } else { res };
    (res + 0.5) as u64
}

/// Adds one message's ranked core words to an accumulated weight map.
pub fn add_message_words(map: &mut WordWeightMap, core_words: &[WordId], max_count: u32) {
    let count = core_words.len() as u32;

    for (i, word_id) in core_words.iter().enumerate() {
        let weight = core_word_weight(i as u32, count, max_count);
        let entry = map.entry(*word_id).or_default();
        entry.weight += weight;
        if i == 0 {
            entry.first_count += 1;
        }
    }
}

/// Weight map of a single message, with no first-rank counts.
pub fn message_word_weights(core_words: &[WordId], max_count: u32) -> WordWeightMap {
    let count = core_words.len() as u32;

    core_words
        .iter()
        .enumerate()
        .map(|(i, word_id)| {
            (
                *word_id,
                WordWeight {
                    weight: core_word_weight(i as u32, count, max_count),
                    first_count: 0,
                },
            )
        })
        .collect()
}

/// Ranks a weight map into a summary.
///
/// Sorted by weight (ties by word id). With `respect_most_frequent` the word most members
/// rank first leads the summary when more than one member agrees on it. The summary is
/// cut at the first zero weight or past `max_words` where the weight changes.
pub fn rank_words(
    map: &WordWeightMap,
    max_words: u32,
    respect_most_frequent: bool,
) -> Vec<EventWordWeight> {
    let mut words: Vec<EventWordWeight> = map
        .iter()
        .map(|(word_id, wc)| EventWordWeight {
            word_id: *word_id,
            weight: wc.weight,
            first_count: wc.first_count,
        })
        .collect();

    words.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.word_id.cmp(&b.word_id)));

    if respect_most_frequent {
        let mut leader: Option<(u32, u64, WordId)> = None;

        for w in words.iter() {
            if w.first_count == 0 {
                continue;
            }
            let better = match leader {
                None => true,
                Some((count, weight, _)) => {
                    count < w.first_count || (count == w.first_count && weight < w.weight)
                }
            };
            if better {
                leader = Some((w.first_count, w.weight, w.word_id));
            }
        }

        if let Some((count, _, word_id)) = leader
            && count > 1
            && let Some(pos) = words.iter().position(|w| w.word_id == word_id)
        {
            words[..=pos].rotate_right(1);
        }
    }

    let max_words = max_words as usize;
    let cut = (0..words.len()).find(|&i| {
        words[i].weight == 0
            || (i > 0 && i >= max_words && words[i].weight != words[i - 1].weight)
    });

    if let Some(cut) = cut {
        words.truncate(cut);
    }

    words
}

/// Reversed-rank position of every word of a summary.
pub fn word_positions(words: &[EventWordWeight]) -> HashMap<WordId, u32> {
    let len = words.len() as u32;
    words
        .iter()
        .enumerate()
        .map(|(i, w)| (w.word_id, len - i as u32))
        .collect()
}

/// Overlap score in `[0, 100]` of a summary against another no shorter one.
///
/// `short` is walked in rank order; `long_positions` gives the other summary's
/// reversed-rank positions and `len_long` its length.
pub fn summary_overlap(
    short: &[EventWordWeight],
    long_positions: &HashMap<WordId, u32>,
    len_long: usize,
) -> u32 {
    let len_short = short.len();

    let mut short_common: Vec<usize> = Vec::with_capacity(len_short);
    let mut long_common: Vec<usize> = Vec::with_capacity(len_short);

    for (i, w) in short.iter().enumerate() {
        if let Some(pos) = long_positions.get(&w.word_id) {
            short_common.push(len_short - i);
            long_common.push(*pos as usize);
        }
    }

    let common = short_common.len();

    if common == 0 || (common < 3 && (len_long > 2 || (common == 1 && len_short > 1))) {
        return 0;
    }

    long_common.sort_unstable_by(|a, b| b.cmp(a));

    let overlap: f64 = short_common
        .iter()
        .zip(long_common.iter())
        .map(|(s, l)| pw_mult(*s, *l))
        .sum();

    let mut short_offset = len_short - short_common[0];
    let mut long_offset = len_long - long_common[0];

    if len_short < len_long {
        let sl = len_short as f64 / len_long as f64;
        short_offset = (short_offset as f64 / sl + 0.5) as usize;
        long_offset = (long_offset as f64 * sl + 0.5) as usize;
    }

    let max = max_overlap(len_short, len_long).max(1.0);
    let result = (overlap * 100.0 / max + 0.5) as usize;
    let penalty = offset_penalty(short_offset + long_offset);

    result.saturating_sub(penalty) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pw_is_superlinear() {
        assert_eq!(pw(1), 1.0);
        assert!(pw(4) > 4.0);
        assert!(pw(4) < 5.0);
    }

    #[test]
    fn test_max_overlap_is_symmetric() {
        assert_eq!(max_overlap(3, 7), max_overlap(7, 3));
        assert_eq!(max_overlap(0, 5), 0.0);
    }

    #[test]
    fn test_offset_penalty_grows_quadratically() {
        assert_eq!(offset_penalty(0), 0);
        assert_eq!(offset_penalty(1), 5);
        assert_eq!(offset_penalty(2), 15);
        assert_eq!(offset_penalty(3), 30);
    }
}
