use anyhow::{bail, ensure, Context, Result};
use clap::Args;
use tracing::{info, warn};

use datapipes_core::{Pipeline, PipelineConfig, Processing, KEY_FIELD};
use datapipes_endpoints::{is_messaging, sink_factory, source_factory};
use datapipes_transforms::{LogProgress, Rename, Shuffle, Slice};

/// Options of the `cat` command
#[derive(Debug, Clone, Args)]
pub struct CatArgs {
    /// Space separated field specs to extract, e.g. "jpg;png cls"
    #[arg(short = 'f', long = "field")]
    pub fields: Option<String>,

    /// Output location ('-' for stdout)
    #[arg(short = 'o', long = "outputs")]
    pub output: Option<String>,

    /// First record index passed on
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub start: i64,

    /// Index at which to stop, negative for no limit
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub end: i64,

    /// Shuffle records in memory within a window of this size, 0 disables
    #[arg(short = 's', long, default_value_t = 0)]
    pub shuffle: usize,

    /// Don't send or expect EOF frames on messaging endpoints
    #[arg(short = 'E', long)]
    pub noeof: bool,

    /// Log progress every N records, 0 disables
    #[arg(short = 'L', long, default_value_t = 0)]
    pub logging: i64,

    /// Fail on records missing a selected field instead of omitting it
    #[arg(long)]
    pub strict: bool,

    /// Records buffered between pipeline components
    #[arg(long, default_value_t = 64)]
    pub capacity: usize,

    /// Input locations: tar files, '-' for stdin, or one messaging URL
    pub inputs: Vec<String>,
}

impl CatArgs {
    fn validate(&self) -> Result<&str> {
        ensure!(!self.inputs.is_empty(), "must provide at least one input (can be '-')");
        let Some(output) = self.output.as_deref().filter(|output| !output.is_empty()) else {
            bail!("must provide output (can be '-')");
        };
        if self.inputs.iter().any(|input| is_messaging(input)) {
            ensure!(self.inputs.len() == 1, "can only use a single messaging URL for input");
        }
        ensure!(self.capacity > 0, "channel capacity must be positive");
        Ok(output)
    }
}

/// Assemble the stages in their fixed order: slice, progress, rename,
/// shuffle.
pub fn build_pipeline(args: &CatArgs) -> Result<Pipeline> {
    let mut pipeline = Pipeline::identity().with(Slice::from_bounds(args.start, args.end));

    if args.logging > 0 {
        pipeline.push(LogProgress::new("cat", args.logging));
    }

    if let Some(fields) = args.fields.as_deref().filter(|fields| !fields.trim().is_empty()) {
        let specs: Vec<&str> = std::iter::once(KEY_FIELD)
            .chain(fields.split_whitespace())
            .collect();
        info!(fields = ?specs, strict = args.strict, "renaming fields");
        pipeline.push(Rename::parse(&specs, args.strict)?);
    }

    if args.shuffle > 0 {
        pipeline.push(Shuffle::from_size(args.shuffle)?);
    }

    Ok(pipeline)
}

/// Execute the `cat` command
pub async fn execute(args: CatArgs) -> Result<()> {
    let output = args.validate()?.to_owned();
    let pipeline = build_pipeline(&args)?;
    info!(
        inputs = ?args.inputs,
        output = %output,
        stages = ?pipeline.stage_names(),
        "starting cat"
    );

    let eof = !args.noeof;
    let processing = Processing::new(
        source_factory(args.inputs.clone(), eof),
        pipeline,
        sink_factory(output.clone(), eof),
    )
    .with_config(PipelineConfig {
        channel_capacity: args.capacity,
    });

    let cancel = processing.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });

    let stats = processing
        .run()
        .await
        .with_context(|| format!("cat into '{output}' failed"))?;

    info!(
        records_read = stats.records_read,
        records_written = stats.records_written,
        elapsed_ms = u64::try_from(stats.elapsed.as_millis()).unwrap_or(u64::MAX),
        "cat finished"
    );
    Ok(())
}
