use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_service::{BuildCounts, LkgService, StageContext, StageInput};
use lkg_storage::{db::Db, qdrant::QdrantStore};

#[derive(Debug, Parser)]
#[command(
	version = lkg_cli::VERSION,
	rename_all = "kebab",
	styles = lkg_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

/// One pipeline stage per invocation; the stage output is printed as JSON.
#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	FileSignature(StageArgs),
	MaterialSignal(StageArgs),
	CrossSet(StageArgs),
	PathIntake(StageArgs),
	Progression(StageArgs),
	Acceptance {
		#[command(flatten)]
		stage: StageArgs,
		#[arg(long, default_value_t = 0)]
		nodes: u32,
		#[arg(long, default_value_t = 0)]
		units: u32,
		#[arg(long, default_value_t = 0)]
		lessons: u32,
		#[arg(long, default_value_t = 0)]
		prompt_size_errors: u32,
	},
}

#[derive(Debug, clap::Args)]
pub struct StageArgs {
	#[arg(long)]
	pub owner: Uuid,
	#[arg(long)]
	pub set: Option<Uuid>,
	#[arg(long)]
	pub path: Option<Uuid>,
	#[arg(long)]
	pub thread: Option<Uuid>,
	#[arg(long)]
	pub saga: Option<Uuid>,
	#[arg(long)]
	pub job_id: Option<String>,
}
impl StageArgs {
	fn input(&self) -> StageInput {
		StageInput {
			owner_user_id: self.owner,
			material_set_id: self.set.unwrap_or_default(),
			saga_id: self.saga,
			path_id: self.path,
			thread_id: self.thread,
			job_id: self.job_id.clone(),
		}
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = lkg_config::load(&args.config)?;

	init_tracing(&config)?;

	let env = PipelineEnv::from_env()?;
	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.storage.qdrant.vector_dim).await?;

	let qdrant = QdrantStore::new(&config.storage.qdrant)?;

	qdrant.ensure_collection().await?;

	let service = LkgService::new(config, db, qdrant);
	let cancel = CancellationToken::new();
	let ctx = StageContext::new(cancel.clone());

	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("Interrupt received; cancelling the running stage.");
			cancel.cancel();
		}
	});

	let output = dispatch(&service, &ctx, &env, args.command).await?;

	println!("{}", serde_json::to_string_pretty(&output)?);

	Ok(())
}

async fn dispatch(
	service: &LkgService,
	ctx: &StageContext,
	env: &PipelineEnv,
	command: Command,
) -> color_eyre::Result<Value> {
	let value = match command {
		Command::FileSignature(stage) => {
			serde_json::to_value(service.build_file_signatures(ctx, &stage.input(), env).await?)?
		},
		Command::MaterialSignal(stage) => {
			serde_json::to_value(service.build_material_signals(ctx, &stage.input(), env).await?)?
		},
		Command::CrossSet(stage) => {
			serde_json::to_value(service.build_cross_set(ctx, &stage.input(), env).await?)?
		},
		Command::PathIntake(stage) => {
			serde_json::to_value(service.run_path_intake(ctx, &stage.input(), env).await?)?
		},
		Command::Progression(stage) => {
			serde_json::to_value(service.compact_progression(ctx, &stage.input(), env).await?)?
		},
		Command::Acceptance { stage, nodes, units, lessons, prompt_size_errors } => {
			let counts = BuildCounts {
				node_count: nodes,
				unit_count: units,
				lesson_count: lessons,
				prompt_size_errors,
			};

			serde_json::to_value(service.evaluate_acceptance(ctx, &stage.input(), counts).await?)?
		},
	};

	Ok(value)
}

fn init_tracing(config: &lkg_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stage_args_map_to_input() {
		let args = Args::parse_from([
			"lkg-worker",
			"-c",
			"lkg.toml",
			"path-intake",
			"--owner",
			"00000000-0000-0000-0000-000000000001",
			"--set",
			"00000000-0000-0000-0000-000000000002",
			"--path",
			"00000000-0000-0000-0000-000000000003",
			"--job-id",
			"job-7",
		]);
		let Command::PathIntake(stage) = args.command else {
			panic!("Expected the path-intake command.");
		};
		let input = stage.input();

		assert_eq!(input.owner_user_id, Uuid::from_u128(1));
		assert_eq!(input.material_set_id, Uuid::from_u128(2));
		assert_eq!(input.path_id, Some(Uuid::from_u128(3)));
		assert_eq!(input.job_id.as_deref(), Some("job-7"));
		assert!(input.thread_id.is_none());
	}

	#[test]
	fn acceptance_counts_default_to_zero() {
		let args = Args::parse_from([
			"lkg-worker",
			"-c",
			"lkg.toml",
			"acceptance",
			"--owner",
			"00000000-0000-0000-0000-000000000001",
			"--nodes",
			"12",
		]);

		assert!(matches!(
			args.command,
			Command::Acceptance { nodes: 12, units: 0, lessons: 0, prompt_size_errors: 0, .. }
		));
	}
}
