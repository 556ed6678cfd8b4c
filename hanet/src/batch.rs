//! Padded batches as consumed by the classifiers.

use std::collections::HashSet;

use derive_more::{Deref, From};
use displaydoc::Display;
use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

use crate::reorder::{ReorderError, UnitOrder};
use layer::{
    embedding::Embedding,
    recurrent::{validate_lengths, InvalidLengths},
};

#[derive(Debug, Display, Error)]
pub enum BatchError {
    /// Invalid sequence lengths: {0}
    Lengths(#[from] InvalidLengths),
    /// Invalid unit order: {0}
    Order(#[from] ReorderError),
}

/// A `(sequences, max_length)` matrix of token indices, `0` is padding.
#[derive(Clone, Debug, Deref, From, PartialEq)]
pub struct Tokens(pub Array2<usize>);

impl Tokens {
    /// Pads token sequences with [`Embedding::PADDING_INDEX`] to the longest length.
    ///
    /// Returns the padded tokens and the true lengths.
    pub fn pad(sequences: &[Vec<usize>]) -> (Self, Vec<usize>) {
        let lengths = sequences.iter().map(Vec::len).collect::<Vec<_>>();
        let max_length = lengths.iter().copied().max().unwrap_or_default();
        let mut tokens = Array2::from_elem((sequences.len(), max_length), Embedding::PADDING_INDEX);
        for (sequence, mut row) in sequences.iter().zip(tokens.outer_iter_mut()) {
            for (&token, padded) in sequence.iter().zip(row.iter_mut()) {
                *padded = token;
            }
        }
        (Self(tokens), lengths)
    }

    /// Flags each position whose token is one of the special tokens.
    ///
    /// The flags are flattened in row-major order, i.e. aligned with the flattened
    /// encoder outputs of the tokens.
    pub fn special_token_flags(&self, special_tokens: &HashSet<usize>) -> Array1<f32> {
        self.0
            .iter()
            .map(|token| {
                if special_tokens.contains(token) {
                    1.
                } else {
                    0.
                }
            })
            .collect()
    }
}

/// A batch of documents made of sentences, for hierarchical classifiers.
#[derive(Clone, Debug)]
pub struct HanBatch {
    sentences: Tokens,
    sentence_lengths: Vec<usize>,
    sentence_order: UnitOrder,
    document_lengths: Vec<usize>,
}

impl HanBatch {
    /// Creates a batch from the flattened sentences of all documents.
    ///
    /// The sentence order refers to the rows of the sentences, the lengths of the
    /// documents are the numbers of their non empty slots. Orders with an empty slot
    /// before a sentence are rejected.
    pub fn new(
        sentences: Tokens,
        sentence_lengths: Vec<usize>,
        sentence_order: UnitOrder,
    ) -> Result<Self, BatchError> {
        let (nr_sentences, max_length) = sentences.dim();
        validate_lengths(&sentence_lengths, nr_sentences, max_length)?;
        let document_lengths = sentence_order.lengths()?;
        Ok(Self {
            sentences,
            sentence_lengths,
            sentence_order,
            document_lengths,
        })
    }

    /// Creates a batch from documents given as lists of tokenized sentences.
    pub fn from_documents(documents: &[Vec<Vec<usize>>]) -> Result<Self, BatchError> {
        let sentences = documents.iter().flatten().cloned().collect::<Vec<_>>();
        let (sentences, sentence_lengths) = Tokens::pad(&sentences);

        let mut next = 0;
        let slots = documents
            .iter()
            .map(|document| {
                let slots = (next..next + document.len()).map(Some).collect::<Vec<_>>();
                next += document.len();
                slots
            })
            .collect::<Vec<_>>();

        Self::new(sentences, sentence_lengths, UnitOrder::from_slots(&slots))
    }

    pub fn sentences(&self) -> ArrayView2<usize> {
        self.sentences.view()
    }

    pub fn sentence_lengths(&self) -> &[usize] {
        &self.sentence_lengths
    }

    pub fn sentence_order(&self) -> &UnitOrder {
        &self.sentence_order
    }

    pub fn document_lengths(&self) -> &[usize] {
        &self.document_lengths
    }

    pub fn nr_documents(&self) -> usize {
        self.document_lengths.len()
    }
}

/// A batch of tweets whose words are regrouped per classified item (e.g. per user).
///
/// The word order refers to the flattened `(tweet, position)` grid of the padded tweets,
/// the word at `(t, p)` is unit `t * max_length + p`.
#[derive(Clone, Debug)]
pub struct TweetBatch {
    tweets: Tokens,
    tweet_lengths: Vec<usize>,
    word_order: UnitOrder,
    word_lengths: Vec<usize>,
}

impl TweetBatch {
    pub fn new(
        tweets: Tokens,
        tweet_lengths: Vec<usize>,
        word_order: UnitOrder,
    ) -> Result<Self, BatchError> {
        let (nr_tweets, max_length) = tweets.dim();
        validate_lengths(&tweet_lengths, nr_tweets, max_length)?;
        let word_lengths = word_order.lengths()?;
        Ok(Self {
            tweets,
            tweet_lengths,
            word_order,
            word_lengths,
        })
    }

    /// Creates a batch from items given as lists of tokenized tweets.
    ///
    /// The words of an item are all words of its tweets in order.
    pub fn from_items(items: &[Vec<Vec<usize>>]) -> Result<Self, BatchError> {
        let tweets = items.iter().flatten().cloned().collect::<Vec<_>>();
        let (tweets, tweet_lengths) = Tokens::pad(&tweets);
        let max_length = tweets.ncols();

        let mut next_tweet = 0;
        let slots = items
            .iter()
            .map(|item| {
                let slots = tweet_lengths[next_tweet..next_tweet + item.len()]
                    .iter()
                    .enumerate()
                    .flat_map(|(tweet, &length)| {
                        let start = (next_tweet + tweet) * max_length;
                        (start..start + length).map(Some)
                    })
                    .collect::<Vec<_>>();
                next_tweet += item.len();
                slots
            })
            .collect::<Vec<_>>();

        Self::new(tweets, tweet_lengths, UnitOrder::from_slots(&slots))
    }

    pub fn tweets(&self) -> &Tokens {
        &self.tweets
    }

    pub fn tweet_lengths(&self) -> &[usize] {
        &self.tweet_lengths
    }

    pub fn word_order(&self) -> &UnitOrder {
        &self.word_order
    }

    /// The number of words per item.
    pub fn word_lengths(&self) -> &[usize] {
        &self.word_lengths
    }

    pub fn nr_items(&self) -> usize {
        self.word_lengths.len()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    #[test]
    fn test_pad_tokens() {
        let (tokens, lengths) = Tokens::pad(&[vec![3, 4], vec![], vec![5, 6, 7]]);
        assert_eq!(*tokens, arr2(&[[3, 4, 0], [0, 0, 0], [5, 6, 7]]));
        assert_eq!(lengths, [2, 0, 3]);
    }

    #[test]
    fn test_han_batch_from_documents() {
        let batch = HanBatch::from_documents(&[
            vec![vec![1, 2, 3], vec![4]],
            vec![vec![5, 6], vec![7, 8], vec![9]],
        ])
        .unwrap();

        assert_eq!(batch.sentences().dim(), (5, 3));
        assert_eq!(batch.sentence_lengths(), [3, 1, 2, 2, 1]);
        assert_eq!(
            batch.sentence_order().indices(),
            arr2(&[[1, 2, 0], [3, 4, 5]])
        );
        assert_eq!(batch.document_lengths(), [2, 3]);
        assert_eq!(batch.nr_documents(), 2);
    }

    #[test]
    fn test_tweet_batch_from_items() {
        let batch = TweetBatch::from_items(&[
            vec![vec![1, 2], vec![3, 4, 5]],
            vec![vec![6]],
        ])
        .unwrap();

        assert_eq!(batch.tweets().dim(), (3, 3));
        assert_eq!(batch.tweet_lengths(), [2, 3, 1]);
        // units are (tweet * 3 + position) + 1
        assert_eq!(
            batch.word_order().indices(),
            arr2(&[[1, 2, 4, 5, 6], [7, 0, 0, 0, 0]])
        );
        assert_eq!(batch.word_lengths(), [5, 1]);
    }

    #[test]
    fn test_special_token_flags() {
        let (tokens, _) = Tokens::pad(&[vec![1, 9], vec![9]]);
        let special = [9].iter().copied().collect();
        assert_eq!(
            tokens.special_token_flags(&special).to_vec(),
            [0., 1., 1., 0.]
        );
    }

    #[test]
    fn test_invalid_lengths_are_rejected() {
        let tokens = Tokens(Array2::zeros((2, 3)));
        let order = UnitOrder::from_indices(arr2(&[[1, 2]]));
        assert!(matches!(
            HanBatch::new(tokens.clone(), vec![3], order.clone()),
            Err(BatchError::Lengths(InvalidLengths::Count { .. })),
        ));
        assert!(matches!(
            TweetBatch::new(tokens, vec![3, 4], order),
            Err(BatchError::Lengths(InvalidLengths::TooLong { .. })),
        ));
    }

    #[test]
    fn test_gapped_orders_are_rejected() {
        let tokens = Tokens(arr2(&[[1, 2], [3, 4]]));
        let gapped = UnitOrder::from_indices(arr2(&[[0, 2], [1, 0]]));
        assert!(matches!(
            HanBatch::new(tokens.clone(), vec![2, 2], gapped.clone()),
            Err(BatchError::Order(ReorderError::GappedOrder {
                document: 0,
                slot: 0,
            })),
        ));
        assert!(matches!(
            TweetBatch::new(tokens.clone(), vec![2, 2], gapped),
            Err(BatchError::Order(ReorderError::GappedOrder { .. })),
        ));

        let ordered = UnitOrder::from_indices(arr2(&[[2, 0], [1, 0]]));
        let batch = HanBatch::new(tokens, vec![2, 2], ordered).unwrap();
        assert_eq!(batch.document_lengths(), [1, 1]);
    }
}
