//! Approvals CLI client - drive approval workflows over WebSocket

mod client;
mod messages;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::client::ApprovalsClient;
use crate::messages::{ClientMessage, InstanceSummary, ServerMessage};

#[derive(Parser)]
#[command(name = "approvals")]
#[command(about = "CLI client for the approvals server")]
#[command(version)]
struct Cli {
    /// Server URL (default: ws://localhost:3000/ws)
    #[arg(short, long, default_value = "ws://localhost:3000/ws")]
    server: String,

    /// Person acting on the command
    #[arg(long = "as", global = true, env = "APPROVALS_PERSON")]
    acting: Option<String>,

    /// Role of the acting person (e.g. hr_admin)
    #[arg(long, global = true, env = "APPROVALS_ROLE")]
    role: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an approval for an offer or interview
    Initiate {
        /// offer or interview
        #[arg(short = 't', long)]
        entity_type: String,

        /// Entity ID
        #[arg(short, long)]
        entity: String,

        /// Routing attributes as key=value (repeatable)
        #[arg(short, long = "context", value_parser = messages::parse_context_pair)]
        context: Vec<(String, Value)>,
    },

    /// Approve a step
    Approve {
        /// Step ID
        step: Uuid,

        #[arg(short, long)]
        comments: Option<String>,
    },

    /// Reject a step
    Reject {
        /// Step ID
        step: Uuid,

        #[arg(short, long)]
        comments: Option<String>,
    },

    /// List steps waiting on the acting person
    Pending,

    /// Show an instance's progress
    Show {
        /// Instance ID
        instance: Uuid,
    },

    /// Show an instance's decision history
    Audit {
        /// Instance ID
        instance: Uuid,
    },

    /// Completion statistics per entity type
    Analytics,

    /// Current steps by SLA status
    Sla,

    /// Run an escalation pass now
    Escalate,

    /// List active workflow templates
    Templates,

    /// List delegations
    Delegations {
        /// Only delegations from this person
        #[arg(long)]
        delegator: Option<String>,
    },

    /// Hand approval authority to someone else
    Delegate {
        /// Delegate's person ID
        #[arg(long)]
        to: String,

        /// blanket, workflow:<template> or department:<name>
        #[arg(long, default_value = "blanket", value_parser = messages::parse_scope)]
        scope: Value,

        /// End of the delegation (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Stream engine events
    Watch {
        /// Show events for everyone instead of only the acting person
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "approvals_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut client = ApprovalsClient::connect(&cli.server).await?;

    match cli.command {
        Commands::Initiate {
            ref entity_type,
            ref entity,
            ref context,
        } => {
            let context: Map<String, Value> = context.iter().cloned().collect();
            let msg = ClientMessage::Initiate {
                entity_type: entity_type.clone(),
                entity_id: entity.clone(),
                context,
                acting_person_id: acting(&cli)?,
                acting_role: cli.role.clone(),
            };
            match client.request(msg).await? {
                ServerMessage::InstanceInitiated { instance } => {
                    println!("Initiated {}", instance.instance.id);
                    print_instance(&instance);
                }
                other => unexpected(other)?,
            }
        }
        Commands::Approve { step, ref comments } => {
            decide(&mut client, &cli, step, "approved", comments.clone()).await?
        }
        Commands::Reject { step, ref comments } => {
            decide(&mut client, &cli, step, "rejected", comments.clone()).await?
        }
        Commands::Pending => run_pending(&mut client, &cli).await?,
        Commands::Show { instance } => {
            match client
                .request(ClientMessage::GetInstance {
                    instance_id: instance,
                })
                .await?
            {
                ServerMessage::Instance { instance } => print_instance(&instance),
                other => unexpected(other)?,
            }
        }
        Commands::Audit { instance } => {
            match client
                .request(ClientMessage::GetAuditTrail {
                    instance_id: instance,
                })
                .await?
            {
                ServerMessage::AuditTrail { entries, .. } => {
                    for entry in entries {
                        let step = entry
                            .step_number
                            .map(|n| format!("step {}", n))
                            .unwrap_or_default();
                        println!(
                            "{}  {:<10} {:<8} {}{}",
                            entry.recorded_at.format("%Y-%m-%d %H:%M"),
                            entry.action,
                            step,
                            entry.actor.as_deref().unwrap_or("system"),
                            entry
                                .comments
                                .map(|c| format!(" - {}", c))
                                .unwrap_or_default()
                        );
                    }
                }
                other => unexpected(other)?,
            }
        }
        Commands::Analytics => match client.request(ClientMessage::GetAnalytics).await? {
            ServerMessage::Analytics { analytics } => {
                println!(
                    "{:<10} {:>6} {:>9} {:>9} {:>10} {:>10}",
                    "type", "total", "approved", "rejected", "in flight", "avg hours"
                );
                println!("{:─<60}", "");
                for row in analytics {
                    println!(
                        "{:<10} {:>6} {:>9} {:>9} {:>10} {:>10}",
                        row.entity_type,
                        row.total,
                        row.approved,
                        row.rejected,
                        row.in_flight,
                        row.avg_duration_hours
                            .map(|h| format!("{:.1}", h))
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
            other => unexpected(other)?,
        },
        Commands::Sla => match client.request(ClientMessage::GetSlaOverview).await? {
            ServerMessage::SlaOverview { overview } => {
                println!("on track:  {}", overview.on_track);
                println!("warning:   {}", overview.warning);
                println!("overdue:   {}", overview.overdue);
                println!("escalated: {}", overview.escalated);
            }
            other => unexpected(other)?,
        },
        Commands::Escalate => match client.request(ClientMessage::CheckEscalations).await? {
            ServerMessage::Escalations { escalations } => {
                if escalations.is_empty() {
                    println!("Nothing to escalate.");
                }
                for e in escalations {
                    println!(
                        "Escalated {} step {} ({}, {}h target) -> {}",
                        e.instance_id,
                        e.step_number,
                        e.step_name,
                        e.target_hours,
                        e.assignees.join(", ")
                    );
                }
            }
            other => unexpected(other)?,
        },
        Commands::Templates => match client.request(ClientMessage::ListTemplates).await? {
            ServerMessage::Templates { templates } => {
                for t in templates {
                    let band = t
                        .routing
                        .map(|r| match r.max {
                            Some(max) => format!("{} in [{}, {})", r.attribute, r.min, max),
                            None => format!("{} >= {}", r.attribute, r.min),
                        })
                        .unwrap_or_else(|| "any".to_string());
                    println!(
                        "{} ({}) - {} - {} - {}h overall",
                        t.id, t.name, t.entity_type, band, t.overall_sla_hours
                    );
                    for s in t.steps {
                        println!(
                            "    {}. {} [{} {}] {}h",
                            s.step_number, s.name, s.approver.kind, s.approver.id, s.sla_hours
                        );
                    }
                }
            }
            other => unexpected(other)?,
        },
        Commands::Delegations { ref delegator } => {
            match client
                .request(ClientMessage::ListDelegations {
                    delegator: delegator.clone(),
                })
                .await?
            {
                ServerMessage::Delegations { delegations } => {
                    if delegations.is_empty() {
                        println!("No delegations found.");
                    }
                    for d in delegations {
                        println!(
                            "{}  {} -> {}  {}  from {}{}{}",
                            d.id,
                            d.delegator,
                            d.delegate,
                            d.scope,
                            d.starts_at.format("%Y-%m-%d"),
                            d.ends_at
                                .map(|e| format!(" until {}", e.format("%Y-%m-%d")))
                                .unwrap_or_default(),
                            if d.active { "" } else { " (revoked)" }
                        );
                    }
                }
                other => unexpected(other)?,
            }
        }
        Commands::Delegate {
            ref to,
            ref scope,
            until,
            ref reason,
        } => {
            let person = acting(&cli)?;
            let msg = ClientMessage::CreateDelegation {
                delegator: person.clone(),
                delegate: to.clone(),
                scope: scope.clone(),
                ends_at: until,
                reason: reason.clone(),
                acting_person_id: person,
                acting_role: cli.role.clone(),
            };
            match client.request(msg).await? {
                ServerMessage::DelegationCreated { delegation } => {
                    println!("Created delegation {}", delegation.id);
                }
                other => unexpected(other)?,
            }
        }
        Commands::Watch { all } => {
            let person = if all { None } else { Some(acting(&cli)?) };
            client.subscribe(person).await?;
            println!("Listening for events...");
            client
                .listen(|msg| {
                    if let ServerMessage::Event { event } = msg {
                        println!("{}", event);
                    }
                    true
                })
                .await?;
        }
    }

    Ok(())
}

fn acting(cli: &Cli) -> Result<String> {
    cli.acting
        .clone()
        .ok_or_else(|| anyhow!("--as <person> is required for this command"))
}

fn unexpected(msg: ServerMessage) -> Result<()> {
    bail!("Unexpected reply: {:?}", msg)
}

async fn decide(
    client: &mut ApprovalsClient,
    cli: &Cli,
    step_id: Uuid,
    decision: &str,
    comments: Option<String>,
) -> Result<()> {
    let msg = ClientMessage::ProcessApproval {
        step_id,
        decision: decision.to_string(),
        comments,
        acting_person_id: acting(cli)?,
        acting_role: cli.role.clone(),
    };
    match client.request(msg).await? {
        ServerMessage::Instance { instance } => {
            print_instance(&instance);
            Ok(())
        }
        other => unexpected(other),
    }
}

async fn run_pending(client: &mut ApprovalsClient, cli: &Cli) -> Result<()> {
    let msg = ClientMessage::ListPending {
        acting_person_id: acting(cli)?,
        acting_role: cli.role.clone(),
    };
    let approvals = match client.request(msg).await? {
        ServerMessage::PendingApprovals { approvals } => approvals,
        other => return unexpected(other),
    };

    if approvals.is_empty() {
        println!("Nothing waiting on you.");
        return Ok(());
    }

    println!("Pending approvals:");
    println!("{:─<72}", "");
    for p in approvals {
        let flags = match (p.escalated, p.on_behalf_of) {
            (true, Some(nominal)) => format!(" [escalated, for {}]", nominal),
            (true, None) => " [escalated]".to_string(),
            (false, Some(nominal)) => format!(" [for {}]", nominal),
            (false, None) => String::new(),
        };
        println!(
            "  {}  {} - step {}: {}  due {} ({}){}",
            p.step.id,
            p.entity.label,
            p.step.step_number,
            p.step.name,
            p.due_at.format("%Y-%m-%d %H:%M"),
            p.sla_status,
            flags
        );
    }
    Ok(())
}

fn print_instance(summary: &InstanceSummary) {
    let instance = &summary.instance;
    let label = summary
        .entity
        .as_ref()
        .map(|e| e.label.clone())
        .unwrap_or_else(|| format!("{} {}", instance.entity_type, instance.entity_id));

    println!("{} - {}", label, summary.template_name);
    println!(
        "  status: {}  initiated by {} at {}",
        instance.status,
        instance.initiated_by,
        instance.initiated_at.format("%Y-%m-%d %H:%M")
    );
    println!(
        "  overall due: {}{}",
        summary.overall_due_at.format("%Y-%m-%d %H:%M"),
        if summary.past_escalation_threshold {
            " (past escalation threshold)"
        } else {
            ""
        }
    );
    for view in &summary.steps {
        let step = &view.step;
        let marker = if instance.status == "pending" && step.step_number == instance.current_step {
            ">"
        } else {
            " "
        };
        let mut line = format!(
            " {} {}. {} [{}] ",
            marker, step.step_number, step.name, step.status
        );
        match (&step.decided_by, &step.delegated_to) {
            (Some(by), Some(delegate)) if by != delegate => {
                line.push_str(&format!("by {} (delegate {})", by, delegate))
            }
            (Some(by), _) => line.push_str(&format!("by {}", by)),
            (None, _) if !view.assignees.is_empty() => {
                line.push_str(&format!("waiting on {}", view.assignees.join(", ")))
            }
            (None, _) => line.push_str(&format!("{} {}", step.approver.kind, step.approver.id)),
        }
        if let Some(sla) = &view.sla {
            line.push_str(&format!("  sla {}h {}", sla.target_hours, sla.status));
            if let (None, Some(deadline)) = (&step.decided_by, sla.deadline) {
                line.push_str(&format!(" until {}", deadline.format("%Y-%m-%d %H:%M")));
            }
            if sla.escalated_at.is_some() {
                line.push_str(" (escalated)");
            }
        }
        println!("{}", line);
        if let Some(comments) = &step.comments {
            println!("      \"{}\"", comments);
        }
    }
}
