use bytes::Bytes;

use super::*;
use crate::config::StackConfig;
use crate::event::{ConnOpen, PullResponse};
use crate::goep::GoepState;
use crate::protocol::{Opcode, PullPhoneBookParams, decode_unicode, opcode::SRM_ENABLE};
use crate::sdp::StaticSdp;
use crate::testing::{Harness, PEER, connect_response, pse_record, response};
use crate::transport::{TransportHandle, TransportTarget};

const CONN_ID: [u8; 4] = [0, 0, 0, 7];
const OTHER: BdAddr = BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x14]);

fn harness() -> Harness {
    harness_with(StackConfig::default())
}

fn harness_with(config: StackConfig) -> Harness {
    let sdp = StaticSdp::new()
        .with_peer(PEER, pse_record(19))
        .with_peer(OTHER, pse_record(3));
    Harness::new(config, sdp)
}

fn open_msg(addr: BdAddr, reply: Option<OpenReply>) -> PbaMsg {
    PbaMsg::Open {
        addr,
        security: 0,
        features: PbapFeatures::DOWNLOAD,
        mtu: 1024,
        reply,
    }
}

/// Opens a connection and stops once the session is requested.
fn start_open(h: &mut Harness, addr: BdAddr) -> Result<PbaHandle, PbaStatus> {
    let (tx, mut rx) = oneshot::channel();
    h.post(open_msg(addr, Some(tx)));
    h.run();
    rx.try_recv().unwrap()
}

/// Runs a connection up to `ConnOpen`, then forgets what happened so far.
fn connect(h: &mut Harness) -> (PbaHandle, TransportHandle) {
    h.post(PbaMsg::Enable);
    let handle = start_open(h, PEER).unwrap();
    let link = h.transport.last_link().unwrap();
    h.transport.accept(link, 1024);
    h.run();
    h.transport.deliver(
        link,
        connect_response(0xA0, 1024, &[(header_id::CONNECTION_ID, &CONN_ID)]),
    );
    h.run();
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
    h.transport.take_sent();
    h.events();
    (handle, link)
}

fn request(h: &mut Harness, handle: PbaHandle, request: PbaRequest) {
    h.post(PbaMsg::Request { handle, request });
    h.run();
}

fn pull_phone_book(name: &str) -> PbaRequest {
    PbaRequest::PullPhoneBook {
        name: name.into(),
        params: None,
    }
}

fn set_path(flag: SetPathFlag, name: Option<&str>) -> PbaRequest {
    PbaRequest::SetPhoneBook {
        flag,
        name: name.map(Into::into),
    }
}

fn name_of(packet: &ObexPacket) -> Option<String> {
    packet.header(header_id::NAME).map(|v| decode_unicode(&v))
}

fn conn_open(event: &Event) -> &ConnOpen {
    match event {
        Event::ConnOpen(info) => info,
        other => panic!("expected ConnOpen, got {other:?}"),
    }
}

#[test]
fn test_connect_reports_peer_capabilities() {
    let mut h = harness();
    h.post(PbaMsg::Enable);
    let handle = start_open(&mut h, PEER).unwrap();
    assert_eq!(handle, 1);
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opening));

    let link = h.transport.last_link().unwrap();
    let server = h.transport.server(link).unwrap();
    assert_eq!(server.target, TransportTarget::Rfcomm { scn: 19 });
    assert_eq!(server.local_mtu, 1024);

    h.transport.accept(link, 900);
    h.run();
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].code(), 0x80);
    assert_eq!(sent[0].connect_info().unwrap().max_packet_length, 1024);
    assert_eq!(
        sent[0].header(header_id::TARGET).as_deref(),
        Some(&PBAP_TARGET_UUID[..])
    );
    let params = AppParams::decode(&sent[0].header(header_id::APP_PARAM).unwrap()).unwrap();
    assert_eq!(params.supported_features, Some(PbapFeatures::DOWNLOAD.bits()));

    h.transport.deliver(
        link,
        connect_response(0xA0, 2048, &[(header_id::CONNECTION_ID, &CONN_ID)]),
    );
    h.run();

    let events = h.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::Init { status: PbaStatus::Success });
    let info = conn_open(&events[1]);
    assert_eq!(info.status, PbaStatus::Success);
    assert_eq!(info.handle, handle);
    assert_eq!(info.addr, PEER);
    assert_eq!(info.peer_features, PbapFeatures::DOWNLOAD);
    assert_eq!(info.peer_version, 0x0102);
    // Bounded by the transport MTU of the peer
    assert_eq!(info.max_tx, 900);
    assert_eq!(info.target, Some(TransportTarget::Rfcomm { scn: 19 }));
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
}

#[test]
fn test_old_peer_gets_no_supported_features() {
    let mut record = pse_record(19);
    record.supported_features = None;
    record.profile_version = None;
    let mut h = Harness::new(StackConfig::default(), StaticSdp::new().with_peer(PEER, record));
    h.post(PbaMsg::Enable);
    start_open(&mut h, PEER).unwrap();
    let link = h.transport.last_link().unwrap();
    h.transport.accept(link, 1024);
    h.run();

    let sent = h.transport.take_sent();
    assert_eq!(sent[0].header(header_id::APP_PARAM), None);

    h.transport.deliver(
        link,
        connect_response(0xA0, 1024, &[(header_id::CONNECTION_ID, &CONN_ID)]),
    );
    h.run();
    let events = h.events();
    let info = conn_open(&events[1]);
    assert_eq!(info.peer_features, PbapFeatures::PEER_DEFAULT);
    assert_eq!(info.peer_version, PEER_DEFAULT_VERSION);
}

#[test]
fn test_open_admission() {
    let mut h = harness_with(StackConfig::default().pba_max_connections(1));
    assert_eq!(start_open(&mut h, PEER), Err(PbaStatus::Disabled));

    h.post(PbaMsg::Enable);
    assert_eq!(start_open(&mut h, PEER), Ok(1));
    assert_eq!(start_open(&mut h, PEER), Err(PbaStatus::AlreadyConnected));
    assert_eq!(start_open(&mut h, OTHER), Err(PbaStatus::NoResource));
    assert_eq!(h.stack.pba.active(), 1);
}

#[test]
fn test_rejected_open_without_reply_reports_conn_open() {
    let mut h = harness();
    h.post(open_msg(PEER, None));
    h.run();
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert_eq!(conn_open(&events[0]).status, PbaStatus::Disabled);
}

#[test]
fn test_discovery_failure_frees_connection() {
    let mut h = Harness::new(StackConfig::default(), StaticSdp::new());
    h.post(PbaMsg::Enable);
    let handle = start_open(&mut h, PEER).unwrap();

    let events = h.events();
    assert_eq!(conn_open(&events[1]).status, PbaStatus::SdpError);
    assert_eq!(h.stack.pba.state(handle), None);
    assert_eq!(h.stack.goep.active(), 0);
}

#[test]
fn test_record_without_channel_is_discovery_failure() {
    let record = PseRecord {
        rfcomm_channel: None,
        ..pse_record(1)
    };
    let mut h = Harness::new(StackConfig::default(), StaticSdp::new().with_peer(PEER, record));
    h.post(PbaMsg::Enable);
    start_open(&mut h, PEER).unwrap();
    let events = h.events();
    assert_eq!(conn_open(&events[1]).status, PbaStatus::SdpError);
    assert_eq!(h.stack.pba.active(), 0);
}

#[test]
fn test_l2cap_preferred_when_offered() {
    let record = PseRecord {
        l2cap_psm: Some(0x1005),
        ..pse_record(19)
    };
    let mut h = Harness::new(StackConfig::default(), StaticSdp::new().with_peer(PEER, record));
    h.transport.set_l2cap(true);
    h.post(PbaMsg::Enable);
    start_open(&mut h, PEER).unwrap();
    let link = h.transport.last_link().unwrap();
    assert_eq!(
        h.transport.server(link).unwrap().target,
        TransportTarget::L2cap { psm: 0x1005 }
    );
}

#[test]
fn test_connect_refusals() {
    for (code, status) in [
        (0xC3, PbaStatus::Forbidden),
        (0xC1, PbaStatus::Unauthorized),
        (0xD3, PbaStatus::ServiceUnavailable),
    ] {
        let mut h = harness();
        h.post(PbaMsg::Enable);
        let handle = start_open(&mut h, PEER).unwrap();
        let link = h.transport.last_link().unwrap();
        h.transport.accept(link, 1024);
        h.run();
        h.transport.deliver(link, connect_response(code, 1024, &[]));
        h.run();

        let events = h.events();
        assert_eq!(conn_open(&events[1]).status, status, "0x{code:02x}");
        assert_eq!(h.stack.pba.state(handle), None);
        assert_eq!(h.stack.goep.active(), 0);
        assert_eq!(h.transport.closed(), vec![link]);
    }
}

#[test]
fn test_connect_without_connection_id_fails() {
    let mut h = harness();
    h.post(PbaMsg::Enable);
    start_open(&mut h, PEER).unwrap();
    let link = h.transport.last_link().unwrap();
    h.transport.accept(link, 1024);
    h.run();
    h.transport.deliver(link, connect_response(0xA0, 1024, &[]));
    h.run();
    let events = h.events();
    assert_eq!(conn_open(&events[1]).status, PbaStatus::Fail);
    assert_eq!(h.stack.pba.active(), 0);
}

#[test]
fn test_transport_failure_while_opening() {
    let mut h = harness();
    h.post(PbaMsg::Enable);
    start_open(&mut h, PEER).unwrap();
    let link = h.transport.last_link().unwrap();
    h.transport.fail(link);
    h.run();
    let events = h.events();
    assert_eq!(conn_open(&events[1]).status, PbaStatus::GoepError);
    assert_eq!(h.stack.pba.active(), 0);
}

#[test]
fn test_pull_phone_book_in_fragments() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);

    let params = PullPhoneBookParams {
        max_list_count: Some(10),
        ..PullPhoneBookParams::default()
    };
    request(
        &mut h,
        handle,
        PbaRequest::PullPhoneBook {
            name: "telecom/pb.vcf".into(),
            params: Some(params),
        },
    );
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Requesting));

    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].code(), u8::from(Opcode::GetFinal));
    assert_eq!(sent[0].header(header_id::CONNECTION_ID).as_deref(), Some(&CONN_ID[..]));
    assert_eq!(name_of(&sent[0]).as_deref(), Some("telecom/pb.vcf"));
    assert_eq!(
        sent[0].header(header_id::TYPE).as_deref(),
        Some(&b"x-bt/phonebook\0"[..])
    );
    let params = AppParams::decode(&sent[0].header(header_id::APP_PARAM).unwrap()).unwrap();
    assert_eq!(params.max_list_count, Some(10));
    assert_eq!(sent[0].header(header_id::SRM), None);

    h.transport
        .deliver(link, response(0x90, &[(header_id::BODY, b"BEGIN:VCARD")]));
    h.run();
    let events = h.events();
    assert_eq!(
        events,
        vec![Event::PullPhoneBookRsp(PullResponse {
            handle,
            status: PbaStatus::Success,
            is_final: false,
            data: Some(Bytes::from_static(b"BEGIN:VCARD")),
            app_params: None,
            packet: None,
        })]
    );
    // Without SRM every fragment is asked for
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].code(), u8::from(Opcode::GetFinal));
    assert_eq!(name_of(&sent[0]), None);

    h.transport.deliver(
        link,
        response(0xA0, &[(header_id::END_OF_BODY, b"END:VCARD")]),
    );
    h.run();
    let events = h.events();
    assert_eq!(events.len(), 1);
    let Event::PullPhoneBookRsp(rsp) = &events[0] else {
        panic!("unexpected {events:?}");
    };
    assert!(rsp.is_final);
    assert_eq!(rsp.status, PbaStatus::Success);
    assert_eq!(rsp.data.as_deref(), Some(&b"END:VCARD"[..]));
    assert!(rsp.packet.is_some());
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
    assert_eq!(h.stack.goep.state(1), Some(GoepState::OpenedIdle));
}

#[test]
fn test_pull_response_carries_app_params() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(
        &mut h,
        handle,
        PbaRequest::PullVCardListing {
            name: String::new(),
            params: None,
        },
    );
    let sent = h.transport.take_sent();
    assert_eq!(name_of(&sent[0]).as_deref(), Some(""));

    let params = AppParams {
        phone_book_size: Some(42),
        ..AppParams::default()
    }
    .encode()
    .unwrap();
    h.transport
        .deliver(link, response(0xA0, &[(header_id::APP_PARAM, &params)]));
    h.run();
    let events = h.events();
    let Event::PullVCardListingRsp(rsp) = &events[0] else {
        panic!("unexpected {events:?}");
    };
    assert_eq!(rsp.app_params.as_ref().unwrap().phone_book_size, Some(42));
}

#[test]
fn test_pull_error_response() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(
        &mut h,
        handle,
        PbaRequest::PullVCardEntry {
            name: "7.vcf".into(),
            params: None,
        },
    );
    h.transport.deliver(link, response(0xC4, &[]));
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::PullVCardEntryRsp(PullResponse::failed(
            handle,
            PbaStatus::NotFound
        ))]
    );
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
}

#[test]
fn test_srm_pull_over_l2cap() {
    let record = PseRecord {
        l2cap_psm: Some(0x1005),
        ..pse_record(19)
    };
    let mut h = Harness::new(StackConfig::default(), StaticSdp::new().with_peer(PEER, record));
    h.transport.set_l2cap(true);
    let (handle, link) = connect(&mut h);

    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));
    let sent = h.transport.take_sent();
    assert_eq!(sent[0].header(header_id::SRM).as_deref(), Some(&[SRM_ENABLE][..]));

    h.transport.deliver(
        link,
        response(
            0x90,
            &[(header_id::SRM, &[SRM_ENABLE]), (header_id::BODY, b"a")],
        ),
    );
    h.transport.deliver(link, response(0x90, &[(header_id::BODY, b"b")]));
    h.transport
        .deliver(link, response(0xA0, &[(header_id::END_OF_BODY, b"c")]));
    h.run();

    // The server streams; nothing more is asked for
    assert!(h.transport.take_sent().is_empty());
    let data: Vec<_> = h
        .events()
        .into_iter()
        .map(|e| match e {
            Event::PullPhoneBookRsp(rsp) => (rsp.is_final, rsp.data.unwrap()),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(
        data,
        vec![
            (false, Bytes::from_static(b"a")),
            (false, Bytes::from_static(b"b")),
            (true, Bytes::from_static(b"c")),
        ]
    );
}

#[test]
fn test_empty_name_is_rejected_locally() {
    let mut h = harness();
    let (handle, _) = connect(&mut h);
    request(&mut h, handle, pull_phone_book(""));
    assert!(h.transport.take_sent().is_empty());
    assert_eq!(
        h.events(),
        vec![Event::PullPhoneBookRsp(PullResponse::failed(
            handle,
            PbaStatus::Fail
        ))]
    );
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));

    // The connection is still usable
    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));
    assert_eq!(h.transport.take_sent().len(), 1);
}

#[test]
fn test_second_request_is_rejected_while_busy() {
    let mut h = harness();
    let (handle, _) = connect(&mut h);
    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));
    request(&mut h, handle, set_path(SetPathFlag::Root, None));

    assert_eq!(h.transport.take_sent().len(), 1);
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Fail
        }]
    );
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Requesting));
}

#[test]
fn test_request_on_unknown_handle() {
    let mut h = harness();
    h.post(PbaMsg::Enable);
    request(&mut h, 2, pull_phone_book("telecom/pb.vcf"));
    let events = h.events();
    assert_eq!(
        events[1],
        Event::PullPhoneBookRsp(PullResponse::failed(2, PbaStatus::Fail))
    );
}

#[test]
fn test_set_phone_book_walks_relative_path() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, set_path(SetPathFlag::Down, Some("telecom/pb")));

    let sent = h.transport.take_sent();
    assert_eq!(sent[0].code(), u8::from(Opcode::SetPath));
    assert_eq!(sent[0].setpath_flags(), Some(0x02));
    assert_eq!(name_of(&sent[0]).as_deref(), Some("telecom"));
    assert_eq!(sent[0].header(header_id::CONNECTION_ID).as_deref(), Some(&CONN_ID[..]));

    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    assert!(h.events().is_empty());
    let sent = h.transport.take_sent();
    assert_eq!(sent[0].setpath_flags(), Some(0x02));
    assert_eq!(name_of(&sent[0]).as_deref(), Some("pb"));

    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Success
        }]
    );
    assert!(h.transport.take_sent().is_empty());
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
}

#[test]
fn test_set_phone_book_absolute_path_starts_at_root() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, set_path(SetPathFlag::Down, Some("/telecom")));

    let sent = h.transport.take_sent();
    assert_eq!(sent[0].setpath_flags(), Some(0x02));
    assert_eq!(sent[0].header(header_id::NAME).as_deref(), Some(&[][..]));

    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    let sent = h.transport.take_sent();
    assert_eq!(name_of(&sent[0]).as_deref(), Some("telecom"));

    h.transport.deliver(link, response(0xC4, &[]));
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::NotFound
        }]
    );
}

#[test]
fn test_set_phone_book_up_and_root() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);

    request(&mut h, handle, set_path(SetPathFlag::Up, None));
    let sent = h.transport.take_sent();
    assert_eq!(sent[0].setpath_flags(), Some(0x03));
    assert_eq!(sent[0].header(header_id::NAME), None);
    h.transport.deliver(link, response(0xA0, &[]));
    h.run();

    request(&mut h, handle, set_path(SetPathFlag::Root, None));
    let sent = h.transport.take_sent();
    assert_eq!(sent[0].setpath_flags(), Some(0x02));
    assert_eq!(name_of(&sent[0]).as_deref(), Some(""));
    h.transport.deliver(link, response(0xA0, &[]));
    h.run();

    let statuses: Vec<_> = h.events().iter().map(Event::status).collect();
    assert_eq!(statuses, vec![PbaStatus::Success, PbaStatus::Success]);
}

#[test]
fn test_set_phone_book_down_needs_a_name() {
    let mut h = harness();
    let (handle, _) = connect(&mut h);
    request(&mut h, handle, set_path(SetPathFlag::Down, None));
    assert!(h.transport.take_sent().is_empty());
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Fail
        }]
    );
}

#[test]
fn test_close_sends_disconnect_once() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);

    h.post(PbaMsg::Close { handle });
    h.post(PbaMsg::Close { handle });
    h.run();
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].code(), u8::from(Opcode::Disconnect));
    assert_eq!(sent[0].header(header_id::CONNECTION_ID).as_deref(), Some(&CONN_ID[..]));
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Closing));

    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::ConnClose { handle, addr: PEER }]
    );
    assert_eq!(h.stack.pba.active(), 0);
    assert_eq!(h.stack.goep.active(), 0);
    assert_eq!(h.transport.closed(), vec![link]);

    h.post(PbaMsg::Close { handle });
    h.run();
    assert!(h.events().is_empty());
}

#[test]
fn test_close_while_opening() {
    let mut h = harness();
    h.post(PbaMsg::Enable);
    let handle = start_open(&mut h, PEER).unwrap();
    h.post(PbaMsg::Close { handle });
    h.run();
    let events = h.events();
    assert_eq!(events[1], Event::ConnClose { handle, addr: PEER });
    assert_eq!(h.stack.goep.active(), 0);
}

#[test]
fn test_session_loss_fails_operation_and_closes() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));

    h.transport.fail(link);
    h.run();
    assert_eq!(
        h.events(),
        vec![
            Event::PullPhoneBookRsp(PullResponse::failed(handle, PbaStatus::GoepError)),
            Event::ConnClose { handle, addr: PEER },
        ]
    );
    assert_eq!(h.stack.pba.active(), 0);
}

#[test]
fn test_stale_session_events_are_dropped() {
    let mut h = harness();
    let (handle, _) = connect(&mut h);
    h.post(PbaMsg::Goep {
        handle,
        session: 999,
        event: GoepEvent::Closed,
    });
    h.post(PbaMsg::SdpResult {
        handle,
        discovery: 999,
        result: Err(SdpError::NoRecord),
    });
    h.run();
    assert!(h.events().is_empty());
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));
}

#[test]
fn test_reopen_gets_a_fresh_session() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    h.transport.fail(link);
    h.run();
    h.events();

    let again = start_open(&mut h, PEER).unwrap();
    assert_eq!(again, handle);
    let new_link = h.transport.last_link().unwrap();
    assert_ne!(new_link, link);
    assert_eq!(h.stack.pba.state(again), Some(PbaState::Opening));
}

#[test]
fn test_disable_tears_everything_down() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    h.post(PbaMsg::Register {
        service_name: "PCE".into(),
    });
    h.post(PbaMsg::Disable);
    h.run();

    assert_eq!(
        h.events(),
        vec![
            Event::Registered { status: PbaStatus::Success },
            Event::ConnClose { handle, addr: PEER },
            Event::Deinit { status: PbaStatus::Success },
        ]
    );
    assert!(!h.stack.pba.is_enabled());
    assert_eq!(h.stack.goep.active(), 0);
    assert_eq!(h.transport.closed(), vec![link]);
    assert!(h.sdp.local_records().is_empty());
}

#[test]
fn test_register_and_deregister() {
    let mut h = harness();
    h.post(PbaMsg::Register {
        service_name: "PCE".into(),
    });
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::Registered { status: PbaStatus::Disabled }]
    );

    h.post(PbaMsg::Enable);
    h.post(PbaMsg::Register {
        service_name: "Phonebook Client".into(),
    });
    h.run();
    let records = h.sdp.local_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].service_name, "Phonebook Client");
    assert_eq!(records[0].profile_version, PCE_PROFILE_VERSION);

    h.post(PbaMsg::Deregister);
    h.post(PbaMsg::Deregister);
    h.run();
    let statuses: Vec<_> = h.events().iter().map(Event::status).collect();
    assert_eq!(
        statuses,
        vec![
            PbaStatus::Success,
            PbaStatus::Success,
            PbaStatus::Success,
            PbaStatus::Fail
        ]
    );
    assert!(h.sdp.local_records().is_empty());
}

#[test]
fn test_request_heap_size() {
    let msg = PbaMsg::Request {
        handle: 1,
        request: PbaRequest::PullVCardListing {
            name: "pb".into(),
            params: Some(PullVCardListingParams {
                search_value: Some("Smith".into()),
                ..PullVCardListingParams::default()
            }),
        },
    };
    assert_eq!(msg.heap_size(), 7);
    assert_eq!(msg.action(), "pba_request");
}

#[test]
fn test_failed_follow_up_get_leaves_connection_usable() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));
    h.transport.take_sent();

    h.transport.congest(link, true);
    h.run();
    h.transport
        .deliver(link, response(0x90, &[(header_id::BODY, b"BEGIN:VCARD")]));
    h.run();
    let finals: Vec<_> = h
        .events()
        .iter()
        .map(|e| (e.status(), matches!(e, Event::PullPhoneBookRsp(rsp) if rsp.is_final)))
        .collect();
    assert_eq!(
        finals,
        vec![(PbaStatus::Success, false), (PbaStatus::GoepError, true)]
    );
    assert!(h.transport.take_sent().is_empty());
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Opened));

    h.transport.congest(link, false);
    h.run();
    request(&mut h, handle, pull_phone_book("telecom/ich.vcf"));
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(name_of(&sent[0]).as_deref(), Some("telecom/ich.vcf"));
    assert!(h.events().is_empty());
    assert_eq!(h.stack.pba.state(handle), Some(PbaState::Requesting));
}

#[test]
fn test_oversized_path_component_leaves_connection_usable() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    let path = format!("/telecom/{}", "x".repeat(600));
    request(&mut h, handle, set_path(SetPathFlag::Down, Some(&path)));
    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    h.transport.deliver(link, response(0xA0, &[]));
    h.run();

    assert_eq!(h.transport.take_sent().len(), 2);
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Fail
        }]
    );

    request(&mut h, handle, set_path(SetPathFlag::Root, None));
    let sent = h.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(name_of(&sent[0]).as_deref(), Some(""));
    h.transport.deliver(link, response(0xA0, &[]));
    h.run();
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Success
        }]
    );
}

#[test]
fn test_absolute_path_sends_one_setpath_per_level() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, set_path(SetPathFlag::Down, Some("/telecom/pb")));

    let mut names = Vec::new();
    for _ in 0..3 {
        assert!(h.events().is_empty());
        let sent = h.transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code(), u8::from(Opcode::SetPath));
        names.push(name_of(&sent[0]).unwrap_or_default());
        h.transport.deliver(link, response(0xA0, &[]));
        h.run();
    }

    assert_eq!(names, vec!["", "telecom", "pb"]);
    assert_eq!(
        h.events(),
        vec![Event::SetPhoneBookRsp {
            handle,
            status: PbaStatus::Success
        }]
    );
    assert!(h.transport.take_sent().is_empty());
}

#[test]
fn test_pull_over_two_continues() {
    let mut h = harness();
    let (handle, link) = connect(&mut h);
    request(&mut h, handle, pull_phone_book("telecom/pb.vcf"));

    let fragments = [
        response(0x90, &[(header_id::BODY, b"A")]),
        response(0x90, &[(header_id::BODY, b"B")]),
        response(0xA0, &[(header_id::END_OF_BODY, b"C")]),
    ];
    let mut seen = Vec::new();
    for fragment in fragments {
        assert_eq!(h.transport.take_sent().len(), 1);
        h.transport.deliver(link, fragment);
        h.run();
        for event in h.events() {
            let Event::PullPhoneBookRsp(rsp) = event else {
                panic!("unexpected {event:?}");
            };
            seen.push((rsp.is_final, rsp.packet.is_some(), rsp.data));
        }
    }

    assert_eq!(
        seen,
        vec![
            (false, false, Some(Bytes::from_static(b"A"))),
            (false, false, Some(Bytes::from_static(b"B"))),
            (true, true, Some(Bytes::from_static(b"C"))),
        ]
    );
    assert!(h.transport.take_sent().is_empty());
}

#[test]
fn test_register_again_after_record_vanished() {
    use crate::sdp::SdpClient;

    let mut h = harness();
    h.post(PbaMsg::Enable);
    h.post(PbaMsg::Register {
        service_name: "PCE".into(),
    });
    h.run();
    let record = h.stack.pba.record.unwrap();
    h.sdp.remove_record(record).unwrap();

    h.post(PbaMsg::Register {
        service_name: "Phonebook Client".into(),
    });
    h.run();
    let statuses: Vec<_> = h.events().iter().map(Event::status).collect();
    assert_eq!(
        statuses,
        vec![PbaStatus::Success, PbaStatus::Success, PbaStatus::Success]
    );
    let records = h.sdp.local_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].service_name, "Phonebook Client");
}

#[test]
fn test_slots_beyond_handle_range_are_not_admitted() {
    let slots = usize::from(PbaHandle::MAX) + 1;
    let mut h = harness_with(StackConfig::default().pba_max_connections(slots));
    h.post(PbaMsg::Enable);
    h.run();
    for slot in 0..slots - 1 {
        h.stack.pba.pool[slot] = Some(super::ccb::PbaCcb::new(
            0,
            OTHER,
            0,
            0,
            PbapFeatures::DOWNLOAD,
            1024,
        ));
    }

    assert_eq!(start_open(&mut h, PEER), Err(PbaStatus::NoResource));
    assert!(h.stack.pba.pool[slots - 1].is_none());
}
