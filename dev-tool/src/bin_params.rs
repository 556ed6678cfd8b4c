use std::{convert::TryInto, fmt, ops::RangeInclusive, path::PathBuf};

use anyhow::{bail, Error};
use log::debug;
use ndarray::{ArrayBase, ArrayD, Data, Dimension};
use structopt::StructOpt;

use layer::io::{BinParams, LoadingBinParamsFailed};

use crate::{
    exit_code::{NON_FATAL_ERROR, NO_ERROR},
    model::{check_params, load_config},
};

#[derive(StructOpt, Debug)]
pub enum BinParamsCmd {
    /// Inspect a ".binparams" file.
    Inspect(InspectBinParamsCmd),
}

impl BinParamsCmd {
    pub fn run(self) -> Result<i32, Error> {
        match self {
            BinParamsCmd::Inspect(cmd) => cmd.run(),
        }
    }
}

#[derive(StructOpt, Debug)]
pub struct InspectBinParamsCmd {
    /// Prints all the values of the arrays.
    #[structopt(short, long)]
    print_data: bool,

    /// Only inspects the arrays in the given scopes, e.g. "word/rnn" or "lin_out".
    ///
    /// Accepts comma separated lists and can be given multiple times.
    #[structopt(short, long)]
    scope: Option<Vec<String>>,

    /// Prints min, max, mean, std and whether there are non finite values.
    #[structopt(long)]
    stats: bool,

    /// Checks that all values are in the given range.
    ///
    /// Format: <from>..=<to>, e.g. --check-range="-10..=20"
    #[structopt(short = "r", long)]
    check_range: Option<String>,

    /// Checks that the parameters load as the model of the JSON configuration.
    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// Path to a ".binparams" file.
    file: PathBuf,
}

impl InspectBinParamsCmd {
    pub fn run(self) -> Result<i32, Error> {
        self.run_(BinParams::deserialize_from_file)
    }

    fn run_(
        self,
        load_bin_params: impl FnOnce(PathBuf) -> Result<BinParams, LoadingBinParamsFailed>,
    ) -> Result<i32, Error> {
        let check_range = self.check_range.as_deref().map(parse_range).transpose()?;
        let scopes = self.scope.map(parse_scopes);
        let params = load_bin_params(self.file)?;

        let mut failed = Vec::new();
        if let Some(config) = self.config {
            let config = load_config(&config)?;
            if let Err(error) = check_params(&config, params.clone()) {
                eprintln!("The parameters don't match the configuration: {}", error);
                failed.push("<config>".to_owned());
            }
        }

        for (name, flat_array) in params {
            if let Some(scopes) = &scopes {
                if !scopes.iter().any(|scope| in_scope(&name, scope)) {
                    debug!("skipping {}", name);
                    continue;
                }
            }

            let array: ArrayD<f32> = flat_array.try_into()?;
            println!("{}: {:?}", name, array.shape());
            let stats = Stats::calculate(array.view());
            if self.stats {
                println!("  {}", stats);
            }
            if let Some(range) = &check_range {
                if !stats.is_within(range) {
                    failed.push(name);
                }
            }
            if self.print_data {
                println!("{:?}", array);
            }
        }

        if failed.is_empty() {
            Ok(NO_ERROR)
        } else {
            failed.sort();
            eprintln!("Checks failed for: {}", failed.join(", "));
            Ok(NON_FATAL_ERROR)
        }
    }
}

/// Whether the array name lies in the scope, scopes are separated by `/`.
fn in_scope(name: &str, scope: &str) -> bool {
    name.strip_prefix(scope)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
}

fn parse_scopes(scopes: Vec<String>) -> Vec<String> {
    scopes
        .iter()
        .flat_map(|scopes| scopes.split(','))
        .map(|scope| scope.trim().trim_end_matches('/').to_owned())
        .filter(|scope| !scope.is_empty())
        .collect()
}

fn parse_range(range: &str) -> Result<RangeInclusive<f32>, Error> {
    let bounds = range.split("..=").collect::<Vec<_>>();
    if let [from, to] = bounds[..] {
        Ok(from.trim().parse()?..=to.trim().parse()?)
    } else {
        bail!("Only <from>..=<to> syntax is allowed.");
    }
}

struct Stats {
    /// Zero for empty arrays.
    min: f32,
    max: f32,
    mean: f32,
    std: f32,
    non_finite: usize,
}

impl Stats {
    fn calculate<S, D>(array: ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let (min, max, non_finite) = array.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0),
            |(min, max, non_finite), &value| {
                if value.is_finite() {
                    (min.min(value), max.max(value), non_finite)
                } else {
                    (min, max, non_finite + 1)
                }
            },
        );
        let (min, max) = if min <= max { (min, max) } else { (0., 0.) };
        Self {
            min,
            max,
            mean: array.mean().unwrap_or_default(),
            std: array.std(0.),
            non_finite,
        }
    }

    fn is_within(&self, range: &RangeInclusive<f32>) -> bool {
        self.non_finite == 0 && range.contains(&self.min) && range.contains(&self.max)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min = {}, max = {}, mean = {}, std = {}, non finite = {}",
            self.min, self.max, self.mean, self.std, self.non_finite
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ndarray::{arr1, arr2};
    use test_utils::assert_approx_eq;

    use super::*;

    fn cmd(scope: Option<Vec<String>>, check_range: Option<&str>) -> InspectBinParamsCmd {
        InspectBinParamsCmd {
            print_data: false,
            scope,
            stats: true,
            check_range: check_range.map(Into::into),
            config: None,
            file: PathBuf::from("/my/path"),
        }
    }

    fn params() -> BinParams {
        let mut params = BinParams::default();
        params.insert("word/att/weights", arr2(&[[1., 3.], [-4., 0.24]]));
        params.insert("word/attention/bias", arr1(&[0., f32::NAN]));
        params.insert("lin_out/bias", arr1(&[0., 0.12]));
        params
    }

    #[test]
    fn test_parse_range() {
        let range = parse_range("-10.3..=-100.4").unwrap();
        assert_approx_eq!(f32, range.start(), -10.3);
        assert_approx_eq!(f32, range.end(), -100.4);
        let range = parse_range("0. ..= 10.").unwrap();
        assert_approx_eq!(f32, range.start(), 0.);
        assert_approx_eq!(f32, range.end(), 10.);
        assert!(parse_range("0..=1..=2").is_err());
        assert!(parse_range("0..1").is_err());
    }

    #[test]
    fn test_scopes() {
        assert_eq!(
            parse_scopes(vec![" word/att/ ,,lin_out".to_owned(), "sent".to_owned()]),
            ["word/att", "lin_out", "sent"]
        );
        assert!(in_scope("word/att/weights", "word/att"));
        assert!(in_scope("word/att", "word/att"));
        assert!(!in_scope("word/attention/bias", "word/att"));
    }

    #[test]
    fn test_calculate_stats() {
        let stats = Stats::calculate(arr2(&[[0.25, 0.125, -10., 1.]]));
        assert_approx_eq!(f32, stats.min, -10.);
        assert_approx_eq!(f32, stats.max, 1.);
        assert_approx_eq!(f32, stats.mean, -2.15625);
        assert_eq!(stats.non_finite, 0);
        assert!(stats.is_within(&(-10.0..=1.0)));
        assert!(!stats.is_within(&(-1.0..=1.0)));

        let stats = Stats::calculate(arr1(&[f32::NAN, f32::INFINITY, 2.]));
        assert_eq!(stats.non_finite, 2);
        assert!(!stats.is_within(&(0.0..=4.0)));
    }

    #[test]
    fn test_failed_range_check_is_non_fatal() {
        let exit_code = cmd(None, Some("-5..=5"))
            .run_(|path| {
                assert_eq!(path, Path::new("/my/path"));
                Ok(params())
            })
            .unwrap();
        assert_eq!(exit_code, NON_FATAL_ERROR);
    }

    #[test]
    fn test_scope_skips_other_arrays() {
        let exit_code = cmd(Some(vec!["word/att,lin_out".to_owned()]), Some("-5..=5"))
            .run_(|_| Ok(params()))
            .unwrap();
        assert_eq!(exit_code, NO_ERROR);
    }
}
