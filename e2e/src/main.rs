pub mod common;
pub mod logging_e2e;

use common::Error;
use logging_e2e::logging_e2e_test;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    match cmd.as_str() {
        "logging" => {
            println!("Running logging-operator end-to-end test");
            logging_e2e_test().await
        }
        _ => {
            println!("Please specify one test: logging");
            Ok(())
        }
    }
}
