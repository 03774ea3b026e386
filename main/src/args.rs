use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API
    Serve,

    /// Answer one question and print the answer as JSON
    Ask {
        /// Tenant whose documents are searched
        #[arg(long)]
        user: String,

        /// Question text
        #[arg(long)]
        query: String,

        /// Restrict retrieval to these documents (repeatable)
        #[arg(long = "attach")]
        attached_document_ids: Vec<String>,
    },
}
