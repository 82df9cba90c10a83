use anyhow::Result;
use clap::Args;
use tracing::warn;

use super::running_daemon;
use crate::cli::output::{AnswerView, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::qa::QaSystem;

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "Question to answer from the ingested documents")]
    pub question: String,

    #[arg(long, help = "Answer in this process even if the daemon is running")]
    pub no_daemon: bool,
}

pub async fn handle_ask(args: AskArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    if let Some(client) = running_daemon(&config, args.no_daemon) {
        match client.ask(&args.question).await {
            Ok(reply) => {
                let view = AnswerView {
                    question: args.question,
                    answer: reply.answer,
                    answered: reply.answered,
                };
                print!("{}", formatter.format_answer(&view));
                return Ok(());
            }
            Err(e) => warn!(error = %e, "daemon unavailable, answering locally"),
        }
    }

    let qa = QaSystem::new(config);
    let outcome = qa.answer(&args.question).await;
    let view = AnswerView {
        question: args.question,
        answered: outcome.is_answered(),
        answer: outcome.into_message(),
    };
    print!("{}", formatter.format_answer(&view));
    Ok(())
}
