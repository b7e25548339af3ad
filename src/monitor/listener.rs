// src/monitor/listener.rs

//! The monitor's RPC TCP listener, dispatching the `Request` surface from
//! §6 against the registry/formation/FSM. Grounded in the teacher's
//! `core/warden/listener.rs`: accept loop spawning one task per
//! connection, each wrapping its socket in a `Framed` codec and looping
//! over decoded requests.

use crate::monitor::events::EventLog;
use crate::monitor::formation::FormationRegistry;
use crate::monitor::fsm::ReplicationFsm;
use crate::monitor::registry::NodeRegistry;
use crate::monitor::state::Node;
use crate::rpc::{JsonCodec, NodeView, Request, Response};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub struct MonitorServices {
    pub registry: Arc<NodeRegistry>,
    pub formations: Arc<FormationRegistry>,
    pub events: Arc<EventLog>,
    pub fsm: Arc<ReplicationFsm>,
}

fn to_view(node: Node) -> NodeView {
    NodeView {
        node_id: node.node_id,
        node_name: node.node_name,
        host: node.node_host,
        port: node.node_port,
        group_id: node.group_id,
        reported_state: node.reported_state,
        goal_state: node.goal_state,
        candidate_priority: node.candidate_priority,
        replication_quorum: node.replication_quorum,
    }
}

pub async fn run(port: u16, services: Arc<MonitorServices>) -> crate::error::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "monitor RPC listener bound");

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let services = services.clone();
                tokio::spawn(async move {
                    info!(%addr, "accepted monitor RPC connection");
                    if let Err(e) = handle_connection(socket, services).await {
                        warn!(%addr, error = %e, "monitor RPC connection failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to accept monitor RPC connection"),
        }
    }
}

async fn handle_connection(socket: TcpStream, services: Arc<MonitorServices>) -> crate::error::Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut requests = Framed::new(read_half, JsonCodec::<Request>::new());
    let mut responses = Framed::new(write_half, JsonCodec::<Response>::new());

    while let Some(result) = requests.next().await {
        let request = match result {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "error decoding monitor RPC request");
                break;
            }
        };
        let response = dispatch(&services, request);
        if let Err(e) = responses.send(response).await {
            warn!(error = %e, "error sending monitor RPC response");
            break;
        }
    }
    Ok(())
}

fn dispatch(services: &MonitorServices, request: Request) -> Response {
    match run_request(services, request) {
        Ok(resp) => resp,
        Err(e) => Response::from_error(&e),
    }
}

fn run_request(services: &MonitorServices, request: Request) -> crate::error::Result<Response> {
    let MonitorServices {
        registry,
        formations,
        events,
        fsm,
    } = services;

    match request {
        Request::RegisterNode {
            formation_id,
            node_name,
            host,
            port,
            desired_group,
            dbname: _,
            candidate_priority,
            replication_quorum,
            system_identifier,
        } => {
            let formation = formations.get_or_default(&formation_id);
            let (node_id, group_id, _) = registry.insert_node(
                &formation_id,
                &node_name,
                &host,
                port,
                desired_group,
                formation.kind,
                candidate_priority,
                replication_quorum,
                system_identifier,
            )?;
            fsm.on_node_registered(registry, events, &formation_id, group_id, node_id)?;
            let node = registry.get(node_id)?;
            Ok(Response::Registered {
                node_id,
                group_id,
                goal_state: node.goal_state,
            })
        }
        Request::NodeActive {
            node_id,
            reported_state,
            pg_is_running,
            sync_state,
            tli,
            lsn,
        } => {
            let result = fsm.node_active(
                registry,
                formations,
                events,
                node_id,
                reported_state,
                pg_is_running,
                sync_state,
                tli,
                lsn,
            )?;
            Ok(Response::NodeActive {
                goal_state: result.goal_state,
                candidate_priority: result.candidate_priority,
                replication_quorum: result.replication_quorum,
            })
        }
        Request::GetNodes { formation_id, group_id } => {
            let nodes = match group_id {
                Some(g) => registry.list_group(&formation_id, g),
                None => registry.list_formation(&formation_id),
            };
            Ok(Response::Nodes(nodes.into_iter().map(to_view).collect()))
        }
        Request::GetOtherNodes { node_id } => {
            let node = registry.get(node_id)?;
            let nodes = registry
                .list_group(&node.formation_id, node.group_id)
                .into_iter()
                .filter(|n| n.node_id != node_id)
                .map(to_view)
                .collect();
            Ok(Response::Nodes(nodes))
        }
        Request::GetPrimary { formation_id, group_id } => {
            Ok(Response::Node(registry.get_primary(&formation_id, group_id).map(to_view)))
        }
        Request::GetCoordinator { .. } => Ok(Response::CoordinatorNotApplicable),
        Request::SetNodeCandidatePriority { node_id, priority } => {
            registry.set_candidate_priority(node_id, priority)?;
            let node = registry.get(node_id)?;
            fsm.apply_settings(registry, events, &node.formation_id, node.group_id)?;
            Ok(Response::Ok)
        }
        Request::SetNodeReplicationQuorum { node_id, quorum } => {
            registry.set_replication_quorum(node_id, quorum)?;
            let node = registry.get(node_id)?;
            fsm.apply_settings(registry, events, &node.formation_id, node.group_id)?;
            Ok(Response::Ok)
        }
        Request::SetFormationNumberSyncStandbys { formation_id, n } => {
            formations.set_number_sync_standbys(&formation_id, n)?;
            Ok(Response::Ok)
        }
        Request::PerformFailover { formation_id, group_id } => {
            fsm.perform_failover(registry, events, &formation_id, group_id)?;
            Ok(Response::Ok)
        }
        Request::StartMaintenance { node_id } => {
            fsm.start_maintenance(registry, events, node_id)?;
            Ok(Response::Ok)
        }
        Request::StopMaintenance { node_id } => {
            fsm.stop_maintenance(registry, events, node_id)?;
            Ok(Response::Ok)
        }
        Request::RemoveNode { node_id } => {
            registry.remove_node(node_id)?;
            Ok(Response::Ok)
        }
        Request::SyncStandbyNames { formation_id, group_id } => {
            let formation = formations.get_or_default(&formation_id);
            let group = registry.list_group(&formation_id, group_id);
            Ok(Response::SyncStandbyNames(crate::monitor::sync_standby::render(&formation, &group)))
        }
    }
}
