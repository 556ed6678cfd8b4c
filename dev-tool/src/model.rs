use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, info};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use hanet::{
    Acwan, CellKind, Config, Cwan, Gru, Han, HanBatch, Lstm, Mode, ModelError, ModelKind,
    TweetBatch,
};
use layer::{io::BinParams, recurrent::RecurrentCell};

use crate::exit_code::NO_ERROR;

#[derive(StructOpt, Debug)]
pub enum ModelCmd {
    /// Creates a ".binparams" file with random weights for a model configuration.
    Init(InitModelCmd),
    /// Runs a model on a JSON batch and prints the logits as JSON.
    Classify(ClassifyCmd),
}

impl ModelCmd {
    pub fn run(self) -> Result<i32, Error> {
        match self {
            ModelCmd::Init(cmd) => cmd.run(),
            ModelCmd::Classify(cmd) => cmd.run(),
        }
    }
}

#[derive(StructOpt, Debug)]
pub struct InitModelCmd {
    /// The seed of the random weights.
    #[structopt(short, long, default_value = "0")]
    seed: u64,

    /// A ".binparams" file with pretrained embeddings stored as "weights".
    #[structopt(short, long)]
    embedding: Option<PathBuf>,

    /// Path to the JSON model configuration.
    config: PathBuf,

    /// Path of the ".binparams" file to create.
    out: PathBuf,
}

impl InitModelCmd {
    pub fn run(self) -> Result<i32, Error> {
        let Self {
            seed,
            embedding,
            config,
            out,
        } = self;
        let config = load_config(&config)?;
        let embedding = embedding
            .map(|file| -> Result<_, Error> {
                let mut params = BinParams::deserialize_from_file(&file)
                    .with_context(|| format!("Loading embeddings from {} failed", file.display()))?;
                Ok(params.take::<Array2<f32>>("weights")?)
            })
            .transpose()?;

        let params = match config.cell() {
            CellKind::Gru => init_params::<Gru>(&config, seed, embedding)?,
            CellKind::Lstm => init_params::<Lstm>(&config, seed, embedding)?,
        };
        params
            .serialize_into_file(&out)
            .with_context(|| format!("Writing {} failed", out.display()))?;
        info!("initialized a {:?} model in {}", config.kind(), out.display());
        Ok(NO_ERROR)
    }
}

#[derive(StructOpt, Debug)]
pub struct ClassifyCmd {
    /// Runs the model in training mode with dropout seeded by the given value.
    #[structopt(long)]
    dropout_seed: Option<u64>,

    #[structopt(long)]
    pretty: bool,

    /// Path to the JSON model configuration.
    config: PathBuf,

    /// Path to the ".binparams" file of the model.
    params: PathBuf,

    /// Path to the JSON batch.
    batch: PathBuf,
}

impl ClassifyCmd {
    pub fn run(self) -> Result<i32, Error> {
        let config = load_config(&self.config)?;
        let params = BinParams::deserialize_from_file(&self.params)
            .with_context(|| format!("Loading {} failed", self.params.display()))?;
        let batch: BatchFile = serde_json::from_reader(BufReader::new(
            File::open(&self.batch)
                .with_context(|| format!("Opening {} failed", self.batch.display()))?,
        ))
        .context("Parsing the batch failed")?;

        let mut rng;
        let mut mode = match self.dropout_seed {
            Some(seed) => {
                rng = StdRng::seed_from_u64(seed);
                Mode::Training(&mut rng)
            }
            None => Mode::Inference,
        };
        let logits = match config.cell() {
            CellKind::Gru => classify::<Gru>(&config, params, &batch, &mut mode)?,
            CellKind::Lstm => classify::<Lstm>(&config, params, &batch, &mut mode)?,
        };

        let output = Logits {
            logits: logits.outer_iter().map(|row| row.to_vec()).collect(),
        };
        let output = if self.pretty {
            serde_json::to_string_pretty(&output)?
        } else {
            serde_json::to_string(&output)?
        };
        println!("{}", output);
        Ok(NO_ERROR)
    }
}

/// A batch of items, i.e. documents of sentences or lists of tweets, given as token ids.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchFile {
    items: Vec<Vec<Vec<usize>>>,
    /// Only used by token-aware models.
    #[serde(default)]
    special_tokens: HashSet<usize>,
}

#[derive(Debug, Serialize)]
struct Logits {
    logits: Vec<Vec<f32>>,
}

pub(crate) fn load_config(file: &Path) -> Result<Config, Error> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Opening {} failed", file.display()))?,
    );
    let config = serde_json::from_reader(reader).context("Parsing the model configuration failed")?;
    debug!("loaded the configuration {:?}", config);
    Ok(config)
}

fn init_params<C>(
    config: &Config,
    seed: u64,
    embedding: Option<Array2<f32>>,
) -> Result<BinParams, ModelError>
where
    C: RecurrentCell,
{
    let rng = &mut StdRng::seed_from_u64(seed);
    Ok(match config.kind() {
        ModelKind::Han => {
            let mut model = Han::<C>::new_with_random_weights(config, rng)?;
            if let Some(weights) = embedding {
                model.set_embedding(weights)?;
            }
            model.into_params()
        }
        ModelKind::Cwan => {
            let mut model = Cwan::<C>::new_with_random_weights(config, rng)?;
            if let Some(weights) = embedding {
                model.set_embedding(weights)?;
            }
            model.into_params()
        }
        ModelKind::Acwan => {
            let mut model = Acwan::<C>::new_with_random_weights(config, rng)?;
            if let Some(weights) = embedding {
                model.set_embedding(weights)?;
            }
            model.into_params()
        }
    })
}

fn classify<C>(
    config: &Config,
    params: BinParams,
    batch: &BatchFile,
    mode: &mut Mode,
) -> Result<Array2<f32>, Error>
where
    C: RecurrentCell,
{
    let logits = match config.kind() {
        ModelKind::Han => {
            let batch = HanBatch::from_documents(&batch.items)?;
            Han::<C>::load(config, params)?.run(&batch, mode)?
        }
        ModelKind::Cwan => {
            let batch = TweetBatch::from_items(&batch.items)?;
            Cwan::<C>::load(config, params)?.run(&batch, mode)?
        }
        ModelKind::Acwan => {
            let tweets = TweetBatch::from_items(&batch.items)?;
            Acwan::<C>::load(config, params)?.run(&tweets, &batch.special_tokens, mode)?
        }
    };
    Ok(logits)
}

/// Checks that the parameters load as the configured model.
pub(crate) fn check_params(config: &Config, params: BinParams) -> Result<(), ModelError> {
    fn check<C: RecurrentCell>(config: &Config, params: BinParams) -> Result<(), ModelError> {
        match config.kind() {
            ModelKind::Han => Han::<C>::load(config, params).map(drop),
            ModelKind::Cwan => Cwan::<C>::load(config, params).map(drop),
            ModelKind::Acwan => Acwan::<C>::load(config, params).map(drop),
        }
    }

    match config.cell() {
        CellKind::Gru => check::<Gru>(config, params),
        CellKind::Lstm => check::<Lstm>(config, params),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    fn config(kind: ModelKind) -> Config {
        Config::new(kind, 20, 3)
            .unwrap()
            .with_embedding_size(4)
            .unwrap()
            .with_hidden_size(2)
            .unwrap()
    }

    fn batch() -> BatchFile {
        serde_json::from_str(
            r#"{ "items": [[[1, 2, 3], [4]], [[5, 19]]], "special_tokens": [19] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_init_and_classify_all_kinds() {
        for kind in [ModelKind::Han, ModelKind::Cwan, ModelKind::Acwan] {
            let config = config(kind);
            let params = init_params::<Gru>(&config, 7, None).unwrap();
            let logits = classify::<Gru>(&config, params, &batch(), &mut Mode::Inference).unwrap();
            assert_eq!(logits.dim(), (2, 3));
        }
    }

    #[test]
    fn test_init_is_seeded() {
        let config = config(ModelKind::Cwan).with_cell(CellKind::Lstm);
        let first = init_params::<Lstm>(&config, 3, None).unwrap();
        let second = init_params::<Lstm>(&config, 3, None).unwrap();
        let first = classify::<Lstm>(&config, first, &batch(), &mut Mode::Inference).unwrap();
        let second = classify::<Lstm>(&config, second, &batch(), &mut Mode::Inference).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_init_with_embedding() {
        let config = config(ModelKind::Han);
        let embedding = Array2::from_elem((25, 4), 0.5);
        let mut params = init_params::<Gru>(&config, 0, Some(embedding.clone())).unwrap();
        let weights: Array2<f32> = params.take("embedding/weights").unwrap();
        assert_eq!(weights, embedding);

        let narrow = arr2(&[[0., 0., 0.]]);
        assert!(init_params::<Gru>(&config, 0, Some(narrow)).is_err());
    }

    #[test]
    fn test_init_cmd_writes_loadable_params() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(
            &config,
            r#"{ "kind": "han", "vocab_size": 20, "num_class": 3, "emb_size": 4, "hid_size": 2 }"#,
        )
        .unwrap();
        let out = dir.path().join("han.binparams");

        let cmd = InitModelCmd {
            seed: 5,
            embedding: None,
            config: config.clone(),
            out: out.clone(),
        };
        assert_eq!(cmd.run().unwrap(), NO_ERROR);

        let params = BinParams::deserialize_from_file(&out).unwrap();
        assert!(check_params(&load_config(&config).unwrap(), params).is_ok());
    }

    #[test]
    fn test_check_params() {
        let config = config(ModelKind::Acwan);
        let params = init_params::<Gru>(&config, 0, None).unwrap();
        assert!(check_params(&config, params.clone()).is_ok());
        assert!(check_params(&config.clone().with_cell(CellKind::Lstm), params.clone()).is_err());
        assert!(check_params(&self::config(ModelKind::Cwan), params).is_err());
    }
}
