//! Token-aware word attention network with an attention gated recurrence.

use std::{
    collections::HashSet,
    io::{Read, Write},
};

use log::{debug, trace};
use ndarray::Array2;
use rand::Rng;

use crate::{
    attention::cosine_query_attention,
    batch::TweetBatch,
    config::{Config, ModelKind},
    gated::AttentionGatedRecurrence,
    model::{check_kind, check_size, check_unused, cwan::WordGatherer, ModelError},
    reorder::reorder_scalars,
    token_aware::{TokenAwareBiRnn, TokenAwarePool},
};
use layer::{
    activation::{Linear, Sigmoid, Tanh},
    dense::Dense,
    dropout::Mode,
    io::BinParams,
    recurrent::{Gru, RecurrentCell},
    utils::concat_last_axis,
};

/// A token-aware word attention network.
///
/// ```ascii
/// w = gathered words                                  (items, words, emb)
/// pooled, token = TokenAwareBiRnn(w, token_mask)      (items, 2 * hidden) each
/// α = σ([pooled; token]·W_gate + b_gate)              (items, 1)
/// combined = α ⊙ pooled + (1 - α) ⊙ token
/// query = tanh(combined·W_query + b_query)            (items, emb)
/// state = AttentionGatedRecurrence(w, cosine(w, query))
/// logits = tanh([combined; state])·W_out + b_out
/// ```
///
/// The token mask flags the gathered words which are one of the special tokens.
#[derive(Clone, Debug)]
pub struct Acwan<C = Gru> {
    words: WordGatherer<C>,
    word: TokenAwareBiRnn<C>,
    gate: Dense<Sigmoid>,
    query: Dense<Tanh>,
    gated: AttentionGatedRecurrence,
    lin_out: Dense<Linear>,
}

impl<C> Acwan<C>
where
    C: RecurrentCell,
{
    pub fn new_with_random_weights<R>(config: &Config, rng: &mut R) -> Result<Self, ModelError>
    where
        R: Rng + ?Sized,
    {
        check_kind(config, ModelKind::Acwan)?;
        let (emb_size, hid_size) = (config.embedding_size(), config.hidden_size());
        let out_size = 2 * hid_size;
        let model = Self {
            words: WordGatherer::new_with_random_weights(config, rng)?,
            word: TokenAwareBiRnn::new_with_random_weights(rng, emb_size, hid_size),
            gate: Dense::new_with_random_weights(rng, 2 * out_size, 1, Sigmoid),
            query: Dense::new_with_random_weights(rng, out_size, emb_size, Tanh),
            gated: AttentionGatedRecurrence::new_with_random_weights(rng, emb_size, emb_size),
            lin_out: Dense::new_with_random_weights(
                rng,
                out_size + emb_size,
                config.num_class(),
                Linear,
            ),
        };
        debug!("created a random acwan model for {:?}", config);
        Ok(model)
    }

    /// Loads the model, all parameters must be used.
    pub fn load(config: &Config, mut params: BinParams) -> Result<Self, ModelError> {
        check_kind(config, ModelKind::Acwan)?;
        let words = WordGatherer::load(config, &mut params)?;
        let word = TokenAwareBiRnn::<C>::load(params.with_scope("word"))?;
        let gate = Dense::load(params.with_scope("gate"), Sigmoid)?;
        let query = Dense::load(params.with_scope("query"), Tanh)?;
        let gated = AttentionGatedRecurrence::load(params.with_scope("gated"))?;
        let lin_out = Dense::load(params.with_scope("lin_out"), Linear)?;
        check_unused(params)?;

        let (emb_size, out_size) = (config.embedding_size(), 2 * config.hidden_size());
        check_size("acwan/word/input", word.input_size(), emb_size)?;
        check_size("acwan/word/output", word.output_size(), out_size)?;
        gate.check_sizes("acwan/gate", 2 * out_size, 1)?;
        query.check_sizes("acwan/query", out_size, emb_size)?;
        check_size("acwan/gated/input", gated.input_size(), emb_size)?;
        check_size("acwan/gated/hidden", gated.hidden_size(), emb_size)?;
        lin_out.check_sizes("acwan/lin_out", out_size + emb_size, config.num_class())?;

        debug!("loaded an acwan model for {:?}", config);
        Ok(Self {
            words,
            word,
            gate,
            query,
            gated,
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
        self.gate.store_params(params.with_scope("gate"));
        self.query.store_params(params.with_scope("query"));
        self.gated.store_params(params.with_scope("gated"));
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
            "set the acwan embedding to a vocabulary of {}",
            self.words.embedding.vocab_size()
        );
        Ok(())
    }

    /// Computes the `(items, num_class)` logits.
    pub fn run(
        &self,
        batch: &TweetBatch,
        special_tokens: &HashSet<usize>,
        mode: &mut Mode,
    ) -> Result<Array2<f32>, ModelError> {
        let gathered = self.words.run(batch, mode)?;
        let lengths = batch.word_lengths();

        let flags = batch.tweets().special_token_flags(special_tokens);
        let token_mask = reorder_scalars(flags.view(), batch.word_order())?;
        let TokenAwarePool {
            pooled, token_sum, ..
        } = self.word.pool(gathered.view(), lengths, token_mask.view())?;

        let alpha = self.gate.run(concat_last_axis(pooled.view(), token_sum.view())?);
        let combined = &alpha * &pooled + &alpha.mapv(|alpha| 1. - alpha) * &token_sum;
        trace!("combined pooled and token vectors with gates {:?}", alpha);

        let query = self.query.run(combined.view());
        let scores = cosine_query_attention(gathered.view(), query.view(), lengths)?;
        let state = self.gated.run(gathered.view(), scores.view())?;

        let features = concat_last_axis(combined.view(), state.view())?;
        let hidden = self
            .words
            .dropout
            .apply(features.mapv_into(f32::tanh), mode);
        Ok(self.lin_out.run(hidden))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use layer::recurrent::Lstm;
    use test_utils::{assert_approx_eq, seeded_rng};

    fn config() -> Config {
        Config::new(ModelKind::Acwan, 40, 4)
            .unwrap()
            .with_embedding_size(6)
            .unwrap()
            .with_hidden_size(3)
            .unwrap()
    }

    fn batch() -> TweetBatch {
        TweetBatch::from_items(&[
            vec![vec![1, 2, 3], vec![4, 39]],
            vec![vec![6, 7, 39, 9]],
            vec![vec![10], vec![]],
        ])
        .unwrap()
    }

    fn special_tokens() -> HashSet<usize> {
        [39].iter().copied().collect()
    }

    #[test]
    fn test_inference_is_deterministic() {
        let model = Acwan::<Gru>::new_with_random_weights(&config(), &mut seeded_rng()).unwrap();
        let batch = batch();
        let logits = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();
        assert_eq!(logits.dim(), (3, 4));
        assert!(logits.iter().all(|v| v.is_finite()));
        let again = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();
        assert_eq!(again, logits);
    }

    #[test]
    fn test_special_tokens_change_the_logits() {
        let model = Acwan::<Gru>::new_with_random_weights(&config(), &mut seeded_rng()).unwrap();
        let batch = batch();
        let with = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();
        let without = model
            .run(&batch, &HashSet::new(), &mut Mode::Inference)
            .unwrap();
        // the third item contains no special token
        assert_approx_eq!(f32, with.row(2), without.row(2));
        assert_ne!(with.row(0), without.row(0));
    }

    #[test]
    fn test_training_applies_dropout() {
        let model = Acwan::<Lstm>::new_with_random_weights(&config(), &mut seeded_rng()).unwrap();
        let batch = batch();
        let inference = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let training = model
            .run(&batch, &special_tokens(), &mut Mode::Training(&mut rng))
            .unwrap();
        assert_ne!(training, inference);
    }

    #[test]
    fn test_serialize_and_deserialize() {
        let config = config();
        let model = Acwan::<Gru>::new_with_random_weights(&config, &mut seeded_rng()).unwrap();
        let batch = batch();
        let expected = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();

        let mut buffer = Vec::new();
        model.serialize_into(&mut buffer).unwrap();
        let model = Acwan::<Gru>::deserialize_from(&config, &buffer[..]).unwrap();
        let logits = model
            .run(&batch, &special_tokens(), &mut Mode::Inference)
            .unwrap();
        assert_approx_eq!(f32, logits, expected);
    }

    #[test]
    fn test_load_rejects_missing_params() {
        let config = config();
        let mut params = Acwan::<Gru>::new_with_random_weights(&config, &mut seeded_rng())
            .unwrap()
            .into_params();
        let _: Array2<f32> = params.take("gate/weights").unwrap();
        assert!(matches!(
            Acwan::<Gru>::load(&config, params),
            Err(ModelError::Loading(_))
        ));
    }

    #[test]
    fn test_set_embedding_keeps_width() {
        let mut model =
            Acwan::<Gru>::new_with_random_weights(&config(), &mut seeded_rng()).unwrap();
        model.set_embedding(Array2::zeros((100, 6))).unwrap();
        assert!(matches!(
            model.set_embedding(Array2::zeros((100, 5))),
            Err(ModelError::Embedding(_))
        ));
    }
}
