use std::process::exit;

use anyhow::Error;
use structopt::StructOpt;

use crate::exit_code::FATAL_ERROR;

mod bin_params;
mod exit_code;
mod model;

/// Tooling for the developers of the attention classifiers.
#[derive(StructOpt, Debug)]
enum CommandArgs {
    /// Commands related to the classifiers (init, classify).
    Model(model::ModelCmd),
    /// Commands related to ".binparams" files (inspect).
    BinParams(bin_params::BinParamsCmd),
}

impl CommandArgs {
    fn run(self) -> Result<i32, Error> {
        match self {
            CommandArgs::Model(cmd) => cmd.run(),
            CommandArgs::BinParams(cmd) => cmd.run(),
        }
    }
}

fn main() {
    env_logger::init();

    let exit_code = match CommandArgs::from_args().run() {
        Ok(exit_code) => exit_code,
        Err(error) => {
            eprintln!("{:?}", error);
            FATAL_ERROR
        }
    };

    exit(exit_code);
}
