//! JobFlow - 求职调研助手
//!
//! 入口：加载配置、初始化日志、构建后端与工具，运行流水线并输出 Markdown 报告。
//! Ctrl+C 在下一个阶段边界取消运行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jobflow::config::{load_config, AppConfig};
use jobflow::jobsearch::{self, JobSearchRequest};
use jobflow::llm::{create_llm_from_config, LlmClient, MockLlmClient};
use jobflow::pipeline::{Pipeline, PipelineDefinition, PipelineRunner, RunOptions, RunnerConfig};
use jobflow::preferences::PreferenceSubmission;
use jobflow::tools::{ToolExecutor, ToolRegistry, WebSearchTool};
use tokio_util::sync::CancellationToken;

/// JobFlow: multi-stage job-search research with LLM workers.
#[derive(Parser)]
#[command(name = "jobflow", version, about, long_about = None)]
struct Cli {
    /// Explicit config file (overrides config/default.toml).
    #[arg(long, global = true, env = "JOBFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the research pipeline and print the final report.
    Run {
        /// Target company.
        #[arg(long)]
        company: Option<String>,

        /// Target role.
        #[arg(long)]
        role: Option<String>,

        /// Experience, e.g. "3 years" or "Entry".
        #[arg(long)]
        experience: Option<String>,

        /// University, used for alumni networking.
        #[arg(long)]
        university: Option<String>,

        /// Resume (PDF or text), attached as knowledge.
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Extra inputs for custom pipelines (repeatable, KEY=VALUE).
        #[arg(long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Custom pipeline definition (TOML) instead of the job-search preset.
        #[arg(long)]
        pipeline: Option<PathBuf>,

        /// Write the report here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print run events as JSON lines on stderr.
        #[arg(long)]
        events: bool,
    },

    /// Show stage order, workers and template references.
    Stages {
        /// Custom pipeline definition (TOML).
        #[arg(long)]
        pipeline: Option<PathBuf>,
    },

    /// Validate a job-preference form submission and print the stored row.
    Preferences {
        /// Comma-separated keywords.
        #[arg(long, default_value = "")]
        keywords: String,

        #[arg(long, default_value = "Remote")]
        location: String,

        /// Full-time, Part-time, Contract or Internship.
        #[arg(long, default_value = "Full-time")]
        job_type: String,

        /// Entry, Mid-Senior, Director or Executive.
        #[arg(long, default_value = "Entry")]
        experience_level: String,

        #[arg(long, default_value = "")]
        salary_range: String,

        /// Email to notify.
        #[arg(long, default_value = "")]
        email: String,

        /// Resume file (PDF or DOCX).
        #[arg(long)]
        resume: Option<PathBuf>,
    },
}

fn load_pipeline(path: Option<&PathBuf>, backend: Arc<dyn LlmClient>) -> anyhow::Result<Pipeline> {
    let pipeline = match path {
        Some(p) => PipelineDefinition::from_file(p)
            .with_context(|| format!("Failed to load pipeline {}", p.display()))?
            .into_pipeline(backend)?,
        None => jobsearch::build_pipeline(backend)?,
    };
    Ok(pipeline)
}

fn build_tools(cfg: &AppConfig) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    match WebSearchTool::from_config(&cfg.search) {
        Some(search) => registry.register(search),
        None => tracing::warn!("search.api_key not set; web_search is unavailable"),
    }
    let tools = ToolExecutor::new(registry, cfg.pipeline.tool_timeout_secs);
    tracing::info!(tools = ?tools.tool_names(), "tools registered");
    tools
}

async fn run_command(
    cfg: AppConfig,
    request: JobSearchRequest,
    extra_inputs: Vec<String>,
    pipeline_path: Option<PathBuf>,
    output: Option<PathBuf>,
    print_events: bool,
) -> anyhow::Result<()> {
    let backend = create_llm_from_config(&cfg.llm).context("Failed to create LLM backend")?;
    tracing::info!(provider = %cfg.llm.provider, model = %backend.model_name(), "backend ready");

    let pipeline = load_pipeline(pipeline_path.as_ref(), backend.clone())?;

    let mut inputs = request.to_inputs();
    for pair in &extra_inputs {
        let Some((k, v)) = pair.split_once('=') else {
            bail!("--input expects KEY=VALUE, got '{}'", pair);
        };
        if !v.trim().is_empty() {
            inputs.insert(k.trim(), v.trim());
        }
    }

    let runner = PipelineRunner::new(RunnerConfig::from(&cfg), Arc::new(build_tools(&cfg)));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling at the next stage boundary");
            ctrl_c_token.cancel();
        }
    });

    let events = if print_events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&ev) {
                    eprintln!("{}", line);
                }
            }
        });
        Some(tx)
    } else {
        None
    };

    let options = RunOptions {
        cancel: Some(cancel),
        events,
    };
    let result = runner
        .run_with(&pipeline, inputs, &request.knowledge_sources(), options)
        .await;

    let (prompt_tokens, completion_tokens, total_tokens) = backend.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");

    let run = match result {
        Ok(run) => run,
        Err(failure) => {
            eprintln!("Run failed: {}", failure.error);
            if let Some(at) = failure.failed_at() {
                eprintln!("  at: {}", at);
            }
            if !failure.completed_stages.is_empty() {
                eprintln!("  completed stages: {}", failure.completed_stages.join(", "));
            }
            eprintln!("  inputs: {}", failure.inputs);
            bail!("run {} did not produce a report", failure.run_id);
        }
    };

    let report = run
        .final_report()
        .context("Run completed without any stage output")?;
    if !report.follows_section_order() {
        tracing::warn!(missing = ?report.missing_sections(), "report does not follow the expected section order");
    }

    match output {
        Some(path) => {
            std::fs::write(&path, report.content())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => println!("{}", report.content()),
    }
    Ok(())
}

fn stages_command(pipeline_path: Option<PathBuf>) -> anyhow::Result<()> {
    let pipeline = load_pipeline(pipeline_path.as_ref(), Arc::new(MockLlmClient))?;
    println!("Pipeline: {}", pipeline.name());
    for (i, stage) in pipeline.stages().iter().enumerate() {
        let inputs: Vec<&str> = stage.input_refs().into_iter().collect();
        println!(
            "{:>2}. {} [{}] inputs: [{}] uses: [{}]",
            i + 1,
            stage.name,
            stage.worker,
            inputs.join(", "),
            stage.stage_refs().join(", ")
        );
    }
    let required: Vec<&str> = pipeline.required_inputs().into_iter().collect();
    println!("Required inputs: {}", required.join(", "));
    Ok(())
}

fn preferences_command(submission: PreferenceSubmission) -> anyhow::Result<()> {
    let validated = submission.validate()?;
    for warning in &validated.warnings {
        eprintln!("warning: {}", warning);
    }
    let row = validated.record.row()?;
    println!("{}", serde_json::to_string_pretty(&row)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    jobflow::observability::init();

    match cli.command {
        Command::Run {
            company,
            role,
            experience,
            university,
            resume,
            inputs,
            pipeline,
            output,
            events,
        } => {
            let cfg = load_config(cli.config).context("Failed to load config")?;
            let request = JobSearchRequest {
                company_name: company.unwrap_or_default(),
                role: role.unwrap_or_default(),
                experience: experience.unwrap_or_default(),
                university_name: university.unwrap_or_default(),
                resume,
            };
            run_command(cfg, request, inputs, pipeline, output, events).await
        }
        Command::Stages { pipeline } => stages_command(pipeline),
        Command::Preferences {
            keywords,
            location,
            job_type,
            experience_level,
            salary_range,
            email,
            resume,
        } => {
            let resume = match resume {
                Some(path) => Some(
                    std::fs::read(&path)
                        .with_context(|| format!("Failed to read resume {}", path.display()))?,
                ),
                None => None,
            };
            preferences_command(PreferenceSubmission {
                keywords,
                location,
                job_type,
                experience_level,
                salary_range,
                notify_email: email,
                resume,
            })
        }
    }
}
