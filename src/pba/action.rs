//! Actions of the connection state table.

use crate::bus::{BusSender, Message, Payload};
use crate::error::GoepError;
use crate::event::{Event, PullResponse};
use crate::goep::{GoepCallback, GoepClient, GoepHandle};
use crate::protocol::{
    AppParams, OBEX_MIN_PACKET_SIZE, OBEX_VERSION, ObexPacket, RequestKind, ResponseCode,
    SETPATH_FLAG_BACKUP, SETPATH_FLAG_DONT_CREATE, encode_unicode, header_id,
};
use crate::sdp::{PseRecord, SdpReply, UUID_PBAP_PSE};
use crate::transport::{ServerInfo, TransportTarget};
use crate::types::{PbaStatus, Repositories};

use super::ccb::{Operation, PEER_DEFAULT_VERSION, PathCursor};
use super::state::{PbaAction, PbaState};
use super::{PBAP_TARGET_UUID, PbaClient, PbaHandle, PbaInput, PbaMsg, PbaRequest, SetPathFlag};
use super::response_app_params;

/// Peers from this version on accept our supported features at connect.
const FEATURES_AT_CONNECT_VERSION: u16 = 0x0102;

impl PbaClient {
    pub(super) fn execute(
        &mut self,
        goep: &mut GoepClient,
        slot: usize,
        action: PbaAction,
        input: PbaInput,
    ) {
        match (action, input) {
            (PbaAction::Ignore, _) => {}
            (PbaAction::StartDiscovery, _) => self.start_discovery(goep, slot),
            (PbaAction::OpenGoep, PbaInput::SdpOk(record)) => self.open_goep(goep, slot, record),
            (PbaAction::SdpFailed, _) => self.fail_open(goep, slot, PbaStatus::SdpError),
            (PbaAction::SendConnect, PbaInput::GoepOpened { peer_mtu, our_mtu }) => {
                self.send_connect(goep, slot, peer_mtu, our_mtu);
            }
            (PbaAction::ConnectRsp, PbaInput::GoepResponse { packet, is_final, .. }) => {
                self.connect_rsp(goep, slot, packet, is_final);
            }
            (PbaAction::SendRequest, PbaInput::Request(request)) => {
                self.send_request(goep, slot, request);
            }
            (PbaAction::RejectRequest, PbaInput::Request(request)) => {
                if let Some(handle) = self.handle_of(slot) {
                    tracing::debug!("pba {} busy, rejecting {:?}", handle, request.operation());
                    self.report(request.operation().failed(handle, PbaStatus::Fail));
                }
            }
            (
                PbaAction::OpResponse,
                PbaInput::GoepResponse {
                    packet,
                    is_final,
                    srm_enabled,
                    srm_wait,
                },
            ) => self.op_response(goep, slot, packet, is_final, srm_enabled, srm_wait),
            (PbaAction::SendDisconnect, _) => self.send_disconnect(goep, slot),
            (PbaAction::DisconnectRsp | PbaAction::CloseConn, _) => self.close_conn(goep, slot),
            (PbaAction::GoepClosed, _) => self.goep_closed(slot),
            (PbaAction::FreeResponse, PbaInput::GoepResponse { packet, .. }) => {
                tracing::debug!("dropping unsolicited response 0x{:02x}", packet.code());
            }
            (action, input) => {
                tracing::error!("{:?} cannot run on {:?}", action, input.event());
            }
        }
    }

    fn start_discovery(&mut self, goep: &mut GoepClient, slot: usize) {
        let Some(ccb) = self.pool[slot].as_ref() else {
            return;
        };
        let reply = SdpReply::new(self.bus.clone(), ccb.handle, ccb.session);
        if let Err(e) = self.sdp.discover(ccb.addr, UUID_PBAP_PSE, reply) {
            tracing::warn!("pba {} discovery not started: {}", ccb.handle, e);
            self.fail_open(goep, slot, PbaStatus::SdpError);
        }
    }

    fn open_goep(&mut self, goep: &mut GoepClient, slot: usize, record: PseRecord) {
        let l2cap = self.prefer_l2cap && goep.supports_l2cap();
        let bus = self.bus.clone();
        let Some(ccb) = self.pool[slot].as_mut() else {
            return;
        };

        ccb.peer_rfcomm = record.rfcomm_channel;
        ccb.peer_psm = record.l2cap_psm;
        ccb.peer_repositories = record
            .supported_repositories
            .unwrap_or(Repositories::LOCAL);
        ccb.peer_version = record.profile_version.unwrap_or(PEER_DEFAULT_VERSION);
        if let Some(features) = record.supported_features {
            ccb.peer_features = features;
            ccb.send_supported_feat = ccb.peer_version >= FEATURES_AT_CONNECT_VERSION;
        }

        let target = match (ccb.peer_psm, ccb.peer_rfcomm) {
            (Some(psm), _) if l2cap => TransportTarget::L2cap { psm },
            (_, Some(scn)) => TransportTarget::Rfcomm { scn },
            (Some(psm), None) => {
                tracing::warn!("pba {} peer offers only L2CAP psm 0x{:04x}", ccb.handle, psm);
                self.fail_open(goep, slot, PbaStatus::SdpError);
                return;
            }
            (None, None) => {
                self.fail_open(goep, slot, PbaStatus::SdpError);
                return;
            }
        };
        ccb.target = Some(target);

        let info = ServerInfo {
            addr: ccb.addr,
            target,
            local_mtu: ccb.mtu,
            security: ccb.security,
        };
        match goep.open(info, goep_callback(bus, ccb.handle, ccb.session)) {
            Ok(handle) => {
                tracing::debug!("pba {} uses goep {}", ccb.handle, handle);
                ccb.goep = Some(handle);
            }
            Err(e) => {
                tracing::warn!("pba {} session not opened: {}", ccb.handle, e);
                self.fail_open(goep, slot, PbaStatus::GoepError);
            }
        }
    }

    fn send_connect(&mut self, goep: &mut GoepClient, slot: usize, peer_mtu: u16, our_mtu: u16) {
        let Some(ccb) = self.pool[slot].as_mut() else {
            return;
        };
        ccb.goep_peer_mtu = peer_mtu;
        ccb.max_rx = our_mtu;
        let Some(handle) = ccb.goep else {
            return;
        };

        let features = ccb
            .send_supported_feat
            .then_some(ccb.local_features.bits());
        let result = build_connect(goep, handle, our_mtu, features);
        if let Err(e) = result {
            tracing::warn!("pba {} CONNECT not sent: {}", ccb.handle, e);
            self.fail_open(goep, slot, PbaStatus::GoepError);
        }
    }

    fn connect_rsp(
        &mut self,
        goep: &mut GoepClient,
        slot: usize,
        packet: ObexPacket,
        is_final: bool,
    ) {
        let Some(ccb) = self.pool[slot].as_mut() else {
            return;
        };

        let status = match packet.response_code() {
            _ if !is_final => PbaStatus::Fail,
            Some(ResponseCode::Ok) => {
                let peer_max = packet
                    .connect_info()
                    .map_or(OBEX_MIN_PACKET_SIZE as u16, |info| info.max_packet_length);
                ccb.max_tx = peer_max
                    .min(ccb.goep_peer_mtu)
                    .max(OBEX_MIN_PACKET_SIZE as u16);

                match connection_id(&packet) {
                    Some(id) => {
                        ccb.connection_id = Some(id);
                        ccb.connected = true;
                        ccb.state = PbaState::Opened;
                        tracing::info!(
                            "pba {} connected to {}, max tx {}",
                            ccb.handle,
                            ccb.addr,
                            ccb.max_tx
                        );
                        let event = ccb.conn_open(PbaStatus::Success);
                        self.report(event);
                        return;
                    }
                    None => {
                        tracing::warn!("pba {} CONNECT response lacks a connection id", ccb.handle);
                        PbaStatus::Fail
                    }
                }
            }
            Some(ResponseCode::Unauthorized) if ccb.authenticate => PbaStatus::AuthFail,
            Some(ResponseCode::Unauthorized) => {
                ccb.authenticate = true;
                PbaStatus::Unauthorized
            }
            _ => PbaStatus::from_response(packet.code()),
        };
        tracing::info!("pba {} CONNECT refused: {:?}", ccb.handle, status);
        self.fail_open(goep, slot, status);
    }

    fn send_request(&mut self, goep: &mut GoepClient, slot: usize, request: PbaRequest) {
        let op = request.operation();
        let Err(status) = self.start_operation(goep, slot, request) else {
            return;
        };
        let Some(ccb) = self.pool[slot].as_mut() else {
            return;
        };
        ccb.state = PbaState::Opened;
        ccb.operation = None;
        ccb.path = None;
        let event = op.failed(ccb.handle, status);
        self.report(event);
    }

    fn start_operation(
        &mut self,
        goep: &mut GoepClient,
        slot: usize,
        request: PbaRequest,
    ) -> Result<(), PbaStatus> {
        let ccb = self.pool[slot].as_mut().ok_or(PbaStatus::Fail)?;
        let handle = ccb.goep.ok_or(PbaStatus::GoepError)?;
        let op = request.operation();
        let params = request.app_params();
        ccb.operation = Some(op);

        let sent = match request {
            PbaRequest::SetPhoneBook { flag, name } => {
                let name = name.unwrap_or_default();
                let (flags, first) = match flag {
                    SetPathFlag::Up => (SETPATH_FLAG_BACKUP | SETPATH_FLAG_DONT_CREATE, name),
                    SetPathFlag::Root => {
                        ccb.path = (!name.is_empty()).then(|| PathCursor::new(name));
                        (SETPATH_FLAG_DONT_CREATE, String::new())
                    }
                    SetPathFlag::Down => {
                        if let Some(absolute) = name.strip_prefix('/') {
                            ccb.path = Some(PathCursor::new(absolute));
                            (SETPATH_FLAG_DONT_CREATE, String::new())
                        } else {
                            let mut cursor = PathCursor::new(name);
                            let first = cursor.next_component().ok_or(PbaStatus::Fail)?;
                            ccb.path = Some(cursor);
                            (SETPATH_FLAG_DONT_CREATE, first)
                        }
                    }
                };
                tracing::debug!("pba {} SETPATH 0x{:02x} {:?}", ccb.handle, flags, first);
                build_setpath(goep, handle, ccb.connection_id, ccb.max_tx, flags, &first)
            }
            PbaRequest::PullPhoneBook { name, .. }
            | PbaRequest::PullVCardListing { name, .. }
            | PbaRequest::PullVCardEntry { name, .. } => {
                if name.is_empty() && op != Operation::PullVCardListing {
                    return Err(PbaStatus::Fail);
                }
                let get = Get {
                    connection_id: ccb.connection_id,
                    max_tx: ccb.max_tx,
                    name: Some(&name),
                    kind: op.type_header(),
                    params: params.as_ref(),
                    srm: ccb.target.is_some_and(TransportTarget::is_l2cap),
                };
                tracing::debug!("pba {} GET {:?} {}", ccb.handle, op, name);
                get.build(goep, handle)
            }
        };
        sent.map_err(|e| {
            tracing::warn!("pba {} {:?} not sent: {}", ccb.handle, op, e);
            status_of(&e)
        })
    }

    fn op_response(
        &mut self,
        goep: &mut GoepClient,
        slot: usize,
        packet: ObexPacket,
        is_final: bool,
        srm_enabled: bool,
        srm_wait: bool,
    ) {
        let Some(ccb) = self.pool[slot].as_mut() else {
            return;
        };
        let handle = ccb.handle;
        let Some(op) = ccb.operation else {
            tracing::debug!("pba {} response with no operation", handle);
            return;
        };

        if op == Operation::SetPhoneBook {
            let mut status = if is_final {
                PbaStatus::from_response(packet.code())
            } else {
                PbaStatus::Fail
            };
            if status.is_success() {
                if let Some(next) = ccb.path.as_mut().and_then(PathCursor::next_component) {
                    let goep_handle = ccb.goep.ok_or(GoepError::InvalidState);
                    let sent = goep_handle.and_then(|h| {
                        build_setpath(
                            goep,
                            h,
                            ccb.connection_id,
                            ccb.max_tx,
                            SETPATH_FLAG_DONT_CREATE,
                            &next,
                        )
                    });
                    match sent {
                        Ok(()) => {
                            tracing::debug!("pba {} SETPATH down {}", handle, next);
                            ccb.state = PbaState::Requesting;
                            return;
                        }
                        Err(e) => {
                            tracing::warn!("pba {} SETPATH not sent: {}", handle, e);
                            status = status_of(&e);
                        }
                    }
                }
            }
            ccb.operation = None;
            ccb.path = None;
            self.report(Event::SetPhoneBookRsp { handle, status });
            return;
        }

        if !is_final {
            let event = op.event(PullResponse {
                handle,
                status: PbaStatus::Success,
                is_final: false,
                data: packet.body(),
                app_params: response_app_params(&packet),
                packet: None,
            });
            ccb.state = PbaState::Requesting;
            let follow_up = if srm_enabled && !srm_wait {
                Ok(())
            } else {
                let goep_handle = ccb.goep.ok_or(GoepError::InvalidState);
                goep_handle.and_then(|h| {
                    Get {
                        connection_id: ccb.connection_id,
                        max_tx: ccb.max_tx,
                        name: None,
                        kind: None,
                        params: None,
                        srm: false,
                    }
                    .build(goep, h)
                })
            };
            if let Err(e) = &follow_up {
                tracing::warn!("pba {} follow-up GET not sent: {}", handle, e);
                ccb.state = PbaState::Opened;
                ccb.operation = None;
            }
            self.report(event);
            if follow_up.is_err() {
                self.report(op.failed(handle, PbaStatus::GoepError));
            }
            return;
        }

        ccb.operation = None;
        let status = PbaStatus::from_response(packet.code());
        let event = if status.is_success() {
            op.event(PullResponse {
                handle,
                status,
                is_final: true,
                data: packet.body(),
                app_params: response_app_params(&packet),
                packet: Some(packet),
            })
        } else {
            tracing::info!("pba {} {:?} failed: {:?}", handle, op, status);
            op.failed(handle, status)
        };
        self.report(event);
    }

    fn send_disconnect(&mut self, goep: &mut GoepClient, slot: usize) {
        let Some(ccb) = self.pool[slot].as_ref() else {
            return;
        };
        let sent = ccb
            .goep
            .ok_or(GoepError::InvalidState)
            .and_then(|handle| build_disconnect(goep, handle, ccb.connection_id));
        if let Err(e) = sent {
            tracing::info!("pba {} DISCONNECT not sent ({}), closing", ccb.handle, e);
            self.close_conn(goep, slot);
        }
    }

    /// Releases a connection at once and reports `ConnClose`.
    pub(super) fn close_conn(&mut self, goep: &mut GoepClient, slot: usize) {
        let Some(ccb) = self.pool.get_mut(slot).and_then(Option::take) else {
            return;
        };
        if let Some(handle) = ccb.goep {
            let _ = goep.close(handle);
        }
        tracing::info!("pba {} closed", ccb.handle);
        self.report(Event::ConnClose {
            handle: ccb.handle,
            addr: ccb.addr,
        });
    }

    /// Releases a connection that never opened and reports `ConnOpen`.
    fn fail_open(&mut self, goep: &mut GoepClient, slot: usize, status: PbaStatus) {
        let Some(ccb) = self.pool.get_mut(slot).and_then(Option::take) else {
            return;
        };
        if let Some(handle) = ccb.goep {
            let _ = goep.close(handle);
        }
        tracing::info!("pba {} to {} failed: {:?}", ccb.handle, ccb.addr, status);
        self.report(ccb.conn_open(status));
    }

    /// The session went away underneath the connection.
    fn goep_closed(&mut self, slot: usize) {
        let Some(mut ccb) = self.pool.get_mut(slot).and_then(Option::take) else {
            return;
        };
        // The engine has already released the handle
        ccb.goep = None;
        if let Some(op) = ccb.operation.take() {
            self.report(op.failed(ccb.handle, PbaStatus::GoepError));
        }
        if ccb.connected {
            tracing::info!("pba {} lost its session", ccb.handle);
            self.report(Event::ConnClose {
                handle: ccb.handle,
                addr: ccb.addr,
            });
        } else {
            self.report(ccb.conn_open(PbaStatus::GoepError));
        }
    }

    fn handle_of(&self, slot: usize) -> Option<PbaHandle> {
        self.pool[slot].as_ref().map(|ccb| ccb.handle)
    }
}

/// Builds the session callback of a connection.
///
/// Events are tagged with the connection's session so that events of a
/// released connection are never applied to a later one on the same handle.
fn goep_callback(bus: BusSender, handle: PbaHandle, session: u32) -> GoepCallback {
    Box::new(move |_, event| {
        let name = event.name();
        let msg = Message::call(Payload::Pba(PbaMsg::Goep {
            handle,
            session,
            event,
        }));
        if let Err(e) = bus.post(msg) {
            tracing::error!("pba {} lost {}: {}", handle, name, e);
        }
    })
}

fn status_of(error: &GoepError) -> PbaStatus {
    match error {
        GoepError::InvalidArgument(_) | GoepError::Codec(_) => PbaStatus::Fail,
        _ => PbaStatus::GoepError,
    }
}

fn connection_id(packet: &ObexPacket) -> Option<u32> {
    let value = packet.header(header_id::CONNECTION_ID)?;
    let bytes: [u8; 4] = value.as_ref().try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Builds and sends one request.
///
/// A packet left half-built by a failed step is dropped, so the session
/// can take the next request.
fn submit(
    goep: &mut GoepClient,
    handle: GoepHandle,
    build: impl FnOnce(&mut GoepClient) -> Result<(), GoepError>,
) -> Result<(), GoepError> {
    build(goep).inspect_err(|_| {
        // The session may already be gone after a send failure
        let _ = goep.discard_request(handle);
    })
}

fn build_connect(
    goep: &mut GoepClient,
    handle: GoepHandle,
    our_mtu: u16,
    features: Option<u32>,
) -> Result<(), GoepError> {
    let kind = RequestKind::Connect {
        version: OBEX_VERSION,
        flags: 0,
        max_packet_length: our_mtu.max(OBEX_MIN_PACKET_SIZE as u16),
    };
    submit(goep, handle, |goep| {
        goep.prepare_request(handle, kind, OBEX_MIN_PACKET_SIZE)?;
        goep.request_add_header(handle, header_id::TARGET, &PBAP_TARGET_UUID)?;
        if let Some(bits) = features {
            let params = AppParams {
                supported_features: Some(bits),
                ..AppParams::default()
            };
            goep.request_add_header(handle, header_id::APP_PARAM, &params.encode()?)?;
        }
        goep.send_request(handle)
    })
}

fn build_setpath(
    goep: &mut GoepClient,
    handle: GoepHandle,
    connection_id: Option<u32>,
    max_tx: u16,
    flags: u8,
    name: &str,
) -> Result<(), GoepError> {
    submit(goep, handle, |goep| {
        goep.prepare_request(handle, RequestKind::SetPath { flags }, usize::from(max_tx))?;
        if let Some(id) = connection_id {
            goep.request_add_header(handle, header_id::CONNECTION_ID, &id.to_be_bytes())?;
        }
        // Going up without a name sends no Name header at all
        if flags & SETPATH_FLAG_BACKUP == 0 || !name.is_empty() {
            goep.request_add_header(handle, header_id::NAME, &encode_unicode(name))?;
        }
        goep.send_request(handle)
    })
}

fn build_disconnect(
    goep: &mut GoepClient,
    handle: GoepHandle,
    connection_id: Option<u32>,
) -> Result<(), GoepError> {
    submit(goep, handle, |goep| {
        goep.prepare_request(handle, RequestKind::Disconnect, OBEX_MIN_PACKET_SIZE)?;
        if let Some(id) = connection_id {
            goep.request_add_header(handle, header_id::CONNECTION_ID, &id.to_be_bytes())?;
        }
        goep.send_request(handle)
    })
}

/// A GET_FINAL request of a pull operation.
struct Get<'a> {
    connection_id: Option<u32>,
    max_tx: u16,
    name: Option<&'a str>,
    kind: Option<&'static [u8]>,
    params: Option<&'a AppParams>,
    srm: bool,
}

impl Get<'_> {
    fn build(self, goep: &mut GoepClient, handle: GoepHandle) -> Result<(), GoepError> {
        let params = match self.params {
            Some(params) if !params.is_empty() => Some(params.encode()?),
            _ => None,
        };
        submit(goep, handle, |goep| {
            goep.prepare_request(handle, RequestKind::GetFinal, usize::from(self.max_tx))?;
            if let Some(id) = self.connection_id {
                goep.request_add_header(handle, header_id::CONNECTION_ID, &id.to_be_bytes())?;
            }
            if let Some(name) = self.name {
                goep.request_add_header(handle, header_id::NAME, &encode_unicode(name))?;
            }
            if let Some(kind) = self.kind {
                goep.request_add_header(handle, header_id::TYPE, kind)?;
            }
            if let Some(params) = params {
                goep.request_add_header(handle, header_id::APP_PARAM, &params)?;
            }
            if self.srm {
                goep.request_set_srm(handle, true, false)?;
            }
            goep.send_request(handle)
        })
    }
}
