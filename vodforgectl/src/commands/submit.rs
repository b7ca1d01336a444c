use clap::Args;
use vodforge_core::{JobService, SubmitRequest};

use crate::Result;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Source object key in the source bucket, e.g. uploads/a.mp4
    pub key: String,
    /// Target resolutions (repeatable); defaults to all five
    #[arg(long = "resolution", short = 'r')]
    pub resolutions: Vec<String>,
    /// Queue priority; higher runs first
    #[arg(long, default_value = "0")]
    pub priority: i64,
    /// Output name; defaults to the key's basename
    #[arg(long)]
    pub video_name: Option<String>,
    /// Completion callback URL
    #[arg(long)]
    pub callback_url: Option<String>,
    /// Emit the receipt as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(service: &JobService, args: SubmitArgs) -> Result<()> {
    let receipt = service
        .submit(SubmitRequest {
            original_key: args.key,
            resolutions: if args.resolutions.is_empty() {
                None
            } else {
                Some(args.resolutions)
            },
            priority: Some(args.priority),
            video_name: args.video_name,
            callback_url: args.callback_url,
        })
        .await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!("job {} queued", receipt.job_id);
        println!("  key:         {}", receipt.original_key);
        println!("  video name:  {}", receipt.video_name);
        println!("  environment: {}", receipt.environment);
        println!(
            "  resolutions: {}",
            receipt
                .resolutions
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Some(url) = &receipt.callback_url {
            println!("  callback:    {url}");
        }
    }
    Ok(())
}
