use clap::{Args, Parser, Subcommand};
use postgres::{Client, NoTls};

#[derive(Parser)]
#[clap(version, about = "Maintenance commands for the messenger database")]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Create the tables and indexes
    Init(Init),
}

#[derive(Args)]
struct Init {
    /// Falls back to DATABASE_URL
    database_url: Option<String>,
}

fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();
    let opts: Opts = Opts::parse();

    match opts.subcmd {
        SubCommand::Init(Init { database_url }) => {
            println!("initializing database");

            let database_url = database_url
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .ok_or_else(|| anyhow::anyhow!("no database url was given and DATABASE_URL is not set"))?;

            let mut client = Client::connect(&database_url, NoTls)?;
            client.batch_execute(include_str!("../schema.sql"))?;
        }
    }
    Ok(())
}
