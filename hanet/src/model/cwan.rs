//! Word attention network over the words of tweets.

use std::io::{Read, Write};

use log::{debug, trace};
use ndarray::{Array2, Array3};
use rand::Rng;

use crate::{
    batch::TweetBatch,
    config::{Config, ConfigError, ModelKind},
    encoder::AttentionalBiRnn,
    model::{check_kind, check_size, check_unused, load_embedding, ModelError},
    reorder::{flatten_sequences, reorder_rows},
};
use layer::{
    activation::Linear,
    dense::Dense,
    dropout::{Dropout, Mode},
    embedding::Embedding,
    io::BinParams,
    recurrent::{Gru, RecurrentCell, Rnn},
};

/// The word encoding front end shared by [`Cwan`] and [`Acwan`](super::acwan::Acwan).
///
/// The tweets are embedded and encoded by a unidirectional recurrent network (with the
/// embedding size as hidden size), then the encoded words are gathered per item.
#[derive(Clone, Debug)]
pub(crate) struct WordGatherer<C> {
    pub(crate) embedding: Embedding,
    pub(crate) dropout: Dropout,
    pub(crate) rnn: Rnn<C>,
}

impl<C> WordGatherer<C>
where
    C: RecurrentCell,
{
    pub(crate) fn new_with_random_weights<R>(
        config: &Config,
        rng: &mut R,
    ) -> Result<Self, ModelError>
    where
        R: Rng + ?Sized,
    {
        let emb_size = config.embedding_size();
        Ok(Self {
            embedding: Embedding::new_with_random_weights(rng, config.vocab_size(), emb_size),
            dropout: Dropout::new(config.dropout()).map_err(ConfigError::from)?,
            rnn: Rnn::new_with_random_weights(rng, emb_size, emb_size),
        })
    }

    pub(crate) fn load(config: &Config, params: &mut BinParams) -> Result<Self, ModelError> {
        let embedding = load_embedding(params.with_scope("embedding"), config)?;
        let rnn = Rnn::load(params.with_scope("rnn"))?;
        check_size("rnn/input", rnn.input_size(), config.embedding_size())?;
        check_size("rnn/output", rnn.output_size(), config.embedding_size())?;
        Ok(Self {
            embedding,
            dropout: Dropout::new(config.dropout()).map_err(ConfigError::from)?,
            rnn,
        })
    }

    pub(crate) fn store_params(self, params: &mut BinParams) {
        self.embedding.store_params(params.with_scope("embedding"));
        self.rnn.store_params(params.with_scope("rnn"));
    }

    /// Gathers the encoded words into `(items, words, embedding_size)`.
    pub(crate) fn run(
        &self,
        batch: &TweetBatch,
        mode: &mut Mode,
    ) -> Result<Array3<f32>, ModelError> {
        let words = self.embedding.run(batch.tweets().view())?;
        let words = self.dropout.apply(words, mode);
        let encoded = self.rnn.run(words.view(), batch.tweet_lengths())?;
        let units = flatten_sequences(encoded.view())?;
        let gathered = reorder_rows(units.view(), batch.word_order())?;
        trace!(
            "gathered encoded words {:?} into {:?}",
            encoded.shape(),
            gathered.shape()
        );
        Ok(gathered)
    }
}

/// A word attention network classifying items made of the words of their tweets.
#[derive(Clone, Debug)]
pub struct Cwan<C = Gru> {
    words: WordGatherer<C>,
    word: AttentionalBiRnn<C>,
    lin_out: Dense<Linear>,
}

impl<C> Cwan<C>
where
    C: RecurrentCell,
{
    pub fn new_with_random_weights<R>(config: &Config, rng: &mut R) -> Result<Self, ModelError>
    where
        R: Rng + ?Sized,
    {
        check_kind(config, ModelKind::Cwan)?;
        let (emb_size, hid_size) = (config.embedding_size(), config.hidden_size());
        let model = Self {
            words: WordGatherer::new_with_random_weights(config, rng)?,
            word: AttentionalBiRnn::new_with_random_weights(rng, emb_size, hid_size),
            lin_out: Dense::new_with_random_weights(rng, 2 * hid_size, config.num_class(), Linear),
        };
        debug!("created a random cwan model for {:?}", config);
        Ok(model)
    }

    /// Loads the model, all parameters must be used.
    pub fn load(config: &Config, mut params: BinParams) -> Result<Self, ModelError> {
        check_kind(config, ModelKind::Cwan)?;
        let words = WordGatherer::load(config, &mut params)?;
        let word = AttentionalBiRnn::<C>::load(params.with_scope("word"))?;
        let lin_out = Dense::load(params.with_scope("lin_out"), Linear)?;
        check_unused(params)?;

        let out_size = 2 * config.hidden_size();
        check_size("cwan/word/input", word.input_size(), config.embedding_size())?;
        check_size("cwan/word/output", word.output_size(), out_size)?;
        lin_out.check_sizes("cwan/lin_out", out_size, config.num_class())?;

        debug!("loaded a cwan model for {:?}", config);
        Ok(Self {
            words,
            word,
            lin_out,
        })
    }

    pub fn deserialize_from(config: &Config, source: impl Read) -> Result<Self, ModelError> {
        Self::load(config, BinParams::deserialize_from(source)?)
    }

    pub fn into_params(self) -> BinParams {
        let mut params = BinParams::default();
        self.words.store_params(&mut params);
        self.word.store_params(params.with_scope("word"));
        self.lin_out.store_params(params.with_scope("lin_out"));
        params
    }

    pub fn serialize_into(self, sink: impl Write) -> Result<(), ModelError> {
        self.into_params().serialize_into(sink).map_err(Into::into)
    }

    /// Replaces the embedding table, e.g. with pretrained embeddings.
    pub fn set_embedding(&mut self, weights: Array2<f32>) -> Result<(), ModelError> {
        self.words.embedding.set_weights(weights)?;
        debug!(
            "set the cwan embedding to a vocabulary of {}",
            self.words.embedding.vocab_size()
        );
        Ok(())
    }

    /// Computes the `(items, num_class)` logits.
    pub fn run(&self, batch: &TweetBatch, mode: &mut Mode) -> Result<Array2<f32>, ModelError> {
        let gathered = self.words.run(batch, mode)?;
        let attended = self
            .word
            .pool_batch_major(gathered.view(), batch.word_lengths())?
            .pooled;
        let hidden = self.words.dropout.apply(attended.mapv_into(f32::tanh), mode);
        Ok(self.lin_out.run(hidden))
    }
}
