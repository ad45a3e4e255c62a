//! taskdeck CLI - task board with pluggable storage and GitHub Issues sync

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::{self, Write};
use taskdeck::cli::display::{
    capacity_hint, display_config, display_migration_result, display_sync_result,
    display_task_detail, display_task_list, error, success,
};
use taskdeck::cli::{Cli, Commands, ConfigCommand};
use taskdeck::config::ConfigStore;
use taskdeck::git::GitOperations;
use taskdeck::migrate::{self, MigrationResult};
use taskdeck::models::{TaskDraft, TaskPatch};
use taskdeck::storage::{
    ProjectLocation, Provider, ProviderError, ProviderMode, TaskProvider,
};
use taskdeck::sync::{GitHubClient, SyncEngine, SyncResult};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;

    if let Err(e) = &result {
        error(&format!("{:#}", e));
        if e
            .downcast_ref::<ProviderError>()
            .is_some_and(ProviderError::is_capacity)
        {
            capacity_hint();
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Identifier that keys this project's local storage
fn repo_id(location: &ProjectLocation) -> String {
    GitOperations::repo_identifier(&location.root).unwrap_or_else(|e| {
        log::debug!("Falling back to the project path as identifier: {}", e);
        location.path_identifier()
    })
}

async fn open_provider(
    mode: ProviderMode,
    config: &ConfigStore,
    location: &ProjectLocation,
) -> Result<Provider> {
    let provider = Provider::open(mode, config, location)?;
    provider
        .initialize(&repo_id(location))
        .await
        .with_context(|| format!("Failed to open {} storage", mode))?;
    Ok(provider)
}

fn finish_migration(result: &MigrationResult) -> Result<()> {
    display_migration_result(result);
    if !result.is_clean() {
        bail!("Finished with {} errors", result.errors.len());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let location = match &cli.dir {
        Some(dir) => ProjectLocation::find_project_from(dir)?,
        None => ProjectLocation::find_project()?,
    };
    let mut config = ConfigStore::load_default(&location)?;

    match cli.command {
        Commands::Init { mode, repo } => {
            if let Some(mode) = mode {
                config.set_mode(mode);
            }
            if let Some(repo) = repo {
                config.set_repo(&repo)?;
            }
            config.save()?;

            open_provider(config.mode(), &config, &location).await?;
            success(&format!(
                "Initialized {} storage in {}",
                config.mode(),
                location.root.display()
            ));
        }

        Commands::Add {
            title,
            description,
            priority,
            status,
            effort,
            value,
            category,
            tags,
            criteria,
            notes,
        } => {
            let provider = open_provider(config.mode(), &config, &location).await?;
            let created = provider
                .create(TaskDraft {
                    description,
                    priority,
                    status,
                    effort,
                    value,
                    tags,
                    category,
                    acceptance_criteria: criteria,
                    notes,
                    ..TaskDraft::new(title)
                })
                .await?;
            success(&format!("Created {}: {}", created.id, created.title));
        }

        Commands::List {
            status,
            priority,
            category,
            tags,
            up_next,
        } => {
            let provider = open_provider(config.mode(), &config, &location).await?;
            let tasks: Vec<_> = provider
                .get_all()
                .await?
                .into_iter()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .filter(|t| priority.is_none_or(|p| t.priority == p))
                .filter(|t| {
                    category
                        .as_deref()
                        .is_none_or(|c| t.category.eq_ignore_ascii_case(c))
                })
                .filter(|t| tags.iter().all(|tag| t.tags.contains(tag)))
                .collect();
            display_task_list(&tasks, up_next);
        }

        Commands::Show { id } => {
            let provider = open_provider(config.mode(), &config, &location).await?;
            let task = provider
                .get_by_id(&id)
                .await?
                .ok_or(ProviderError::NotFound(id))?;
            display_task_detail(&task);
        }

        Commands::Update {
            id,
            title,
            description,
            priority,
            effort,
            value,
            category,
            tags,
            criteria,
            notes,
            order,
        } => {
            let patch = TaskPatch {
                title,
                description,
                priority,
                effort,
                value,
                category,
                tags,
                acceptance_criteria: criteria,
                notes,
                order,
                ..Default::default()
            };
            if patch.is_empty() {
                log::info!("Nothing to update.");
                return Ok(());
            }

            let provider = open_provider(config.mode(), &config, &location).await?;
            let task = provider.update(&id, patch).await?;
            success(&format!("Updated {}: {}", task.id, task.title));
        }

        Commands::Status { id, status } => {
            let provider = open_provider(config.mode(), &config, &location).await?;
            let task = provider
                .update(
                    &id,
                    TaskPatch {
                        status: Some(status),
                        ..Default::default()
                    },
                )
                .await?;
            success(&format!("Set {} status to {}", task.id, task.status));
        }

        Commands::Delete { id, force } => {
            let provider = open_provider(config.mode(), &config, &location).await?;

            if !force {
                let task = provider
                    .get_by_id(&id)
                    .await?
                    .ok_or_else(|| ProviderError::NotFound(id.clone()))?;
                print!("Delete {} '{}'? [y/N] ", task.id, task.title);
                io::stdout().flush()?;

                let mut input = String::new();
                io::stdin().read_line(&mut input)?;

                if !input.trim().eq_ignore_ascii_case("y") {
                    log::info!("Cancelled.");
                    return Ok(());
                }
            }

            provider.delete(&id).await?;
            success(&format!("Deleted {}", id));
        }

        Commands::Export { output } => {
            let provider = open_provider(config.mode(), &config, &location).await?;
            let markdown = provider.export_to_markdown().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, markdown)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    success(&format!("Exported tasks to {}", path.display()));
                }
                None => print!("{}", markdown),
            }
        }

        Commands::Import { path, mode } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let provider = open_provider(config.mode(), &config, &location).await?;
            let result = migrate::import_markdown(&provider, &text, mode).await;
            finish_migration(&result)?;
        }

        Commands::Migrate { to, purge } => {
            let from = config.mode();
            if from == to {
                log::info!("Already using {} storage.", to);
                return Ok(());
            }

            let source = open_provider(from, &config, &location).await?;
            let dest = open_provider(to, &config, &location).await?;
            let result = migrate::migrate(&source, &dest, &mut config, to, purge).await;
            finish_migration(&result)?;
            success(&format!("Now using {} storage", config.mode()));
        }

        Commands::Merge { into } => {
            let local = open_provider(ProviderMode::Local, &config, &location).await?;
            let file = open_provider(ProviderMode::File, &config, &location).await?;
            let target_mode = into.unwrap_or(config.mode());
            let target = open_provider(target_mode, &config, &location).await?;

            let result = migrate::merge(&local, &file, &target).await;
            finish_migration(&result)?;
            success(&format!("Merged tasks into {} storage", target_mode));
        }

        Commands::Sync { resolve, json } => {
            let sync_config = config.sync_config(GitOperations::github_repo(&location.root))?;
            let engine = SyncEngine::new(GitHubClient::new(&sync_config)?);
            let provider = open_provider(config.mode(), &config, &location).await?;

            log::info!("Syncing with {}", sync_config.repo);
            let result = engine.sync(&provider).await?;

            let mut resolved = SyncResult::default();
            if let Some(resolution) = resolve {
                for conflict in &result.conflicts {
                    let outcome = engine.resolve(&provider, conflict, resolution).await;
                    resolved.pushed.extend(outcome.pushed);
                    resolved.pulled.extend(outcome.pulled);
                    resolved.errors.extend(outcome.errors);
                }
            }

            if json {
                let out = match resolve {
                    Some(_) => serde_json::json!({ "sync": result, "resolved": resolved }),
                    None => serde_json::to_value(&result)?,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                display_sync_result(&result);
                if resolve.is_some() && !result.conflicts.is_empty() {
                    success(&format!("Resolved {} conflicts:", result.conflicts.len()));
                    display_sync_result(&resolved);
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigCommand::Show => {
                let default_repo = GitOperations::github_repo(&location.root);
                display_config(&config, default_repo.as_deref());
            }
            ConfigCommand::SetToken { token } => {
                config.set_token(token);
                config.save()?;
                success("Saved GitHub token");
            }
            ConfigCommand::SetRepo { repo } => {
                config.set_repo(&repo)?;
                config.save()?;
                success(&format!("Linked to {}", repo.trim()));
            }
            ConfigCommand::SetApiUrl { url } => {
                config.set_api_url(url);
                config.save()?;
                success("Saved API URL");
            }
        },
    }

    Ok(())
}
