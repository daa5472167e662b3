//! Extended-query request cycles on a modern session.

mod common;

use std::time::Duration;

use common::{FakeServer, Msg, Peer, accept};
use zero_pgwire::{
    Error, Query, QueryFlags, ResultCollector, Session, SimpleParameterList, TransactionStatus,
};

fn tags(messages: &[Msg]) -> String {
    messages.iter().map(|m| char::from(m.tag)).collect()
}

fn serve(script: impl FnOnce(&mut Peer) + Send + 'static) -> (FakeServer, Session) {
    let server = FakeServer::start(move |listener| {
        let mut peer = accept(&listener);
        peer.modern_handshake();
        script(&mut peer);
        peer.wait_for_close();
    });
    let session = Session::connect(server.opts()).unwrap();
    (server, session)
}

const NO_BEGIN: QueryFlags = QueryFlags {
    one_shot: false,
    suppress_begin: true,
    describe_only: false,
    no_results: false,
    no_metadata: false,
    both_rows_and_status: false,
};

#[test]
fn select_inside_implicit_begin() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PBEPBDES");
        assert!(messages[0].body.starts_with(b"\0BEGIN\0"));
        assert!(messages[3].body.starts_with(b"S_1\0SELECT $1\0"));
        // unnamed portal, statement S_1, one binary int4 value, no result formats
        let mut bind = b"\0S_1\0".to_vec();
        bind.extend_from_slice(&[0, 1, 0, 1, 0, 1, 0, 0, 0, 4, 0, 0, 0, 7, 0, 0]);
        assert_eq!(messages[4].body, bind);

        peer.parse_complete()
            .bind_complete()
            .complete("BEGIN")
            .parse_complete()
            .bind_complete()
            .row_description(&[("n", 23)])
            .data_row(&[Some("7")])
            .complete("SELECT 1")
            .ready(b'T')
            .flush();
    });

    let query = Query::parse("SELECT ?", true);
    let mut params = query.create_parameter_list();
    params.set_int(1, 7).unwrap();
    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 0, QueryFlags::default())
        .unwrap();

    let results = collector.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fields[0].label, "n");
    assert_eq!(results[0].rows[0].get_str(0).unwrap(), Some("7"));
    assert!(collector.statuses().is_empty());
    assert_eq!(session.transaction_status(), TransactionStatus::InTransaction);
    drop(session);
    server.join();
}

#[test]
fn cached_statement_is_rebound() {
    let (server, mut session) = serve(|peer| {
        let first = peer.read_until_sync();
        assert_eq!(tags(&first), "PBDES");
        peer.parse_complete()
            .bind_complete()
            .no_data()
            .complete("UPDATE 3")
            .ready(b'I')
            .flush();

        let second = peer.read_until_sync();
        assert_eq!(tags(&second), "BDES");
        assert!(second[0].body.starts_with(b"\0S_1\0"));
        peer.bind_complete()
            .no_data()
            .complete("UPDATE 4")
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("UPDATE t SET x = ?", true);
    for expected in [3, 4] {
        let mut params = query.create_parameter_list();
        params.set_string(1, "a").unwrap();
        let mut collector = ResultCollector::new();
        session
            .execute(&query, &mut params, &mut collector, 0, NO_BEGIN)
            .unwrap();
        assert_eq!(collector.update_count(), Some(expected));
    }
    drop(session);
    server.join();
}

#[test]
fn type_change_reparses() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .no_data()
            .complete("UPDATE 1")
            .ready(b'I')
            .flush();

        let second = peer.read_until_sync();
        assert_eq!(tags(&second), "CPBDES");
        assert_eq!(second[0].body, b"SS_1\0");
        assert!(second[1].body.starts_with(b"S_2\0"));
        peer.msg(b'3', &[])
            .parse_complete()
            .bind_complete()
            .no_data()
            .complete("UPDATE 1")
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("UPDATE t SET x = ?", true);
    let mut params = query.create_parameter_list();
    params.set_string(1, "1").unwrap();
    session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap();
    params.set_int(1, 1).unwrap();
    session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap();
    drop(session);
    server.join();
}

#[test]
fn failed_parse_is_not_cached() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.error("42601", "syntax error at or near \"SELEC\"")
            .ready(b'I')
            .flush();

        let second = peer.read_until_sync();
        assert_eq!(tags(&second), "PBDES");
        assert!(second[0].body.starts_with(b"S_2\0"));
        peer.error("42601", "syntax error at or near \"SELEC\"")
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("SELEC 1", false);
    for _ in 0..2 {
        let mut params = query.create_parameter_list();
        let err = session
            .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
        assert!(!session.is_closed());
    }
    drop(session);
    server.join();
}

#[test]
fn errors_are_chained_until_ready() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PBDEPBDES");
        peer.parse_complete()
            .bind_complete()
            .no_data()
            .complete("UPDATE abc")
            .parse_complete()
            .bind_complete()
            .error("23505", "duplicate key value violates unique constraint")
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("UPDATE a SET x = 1; INSERT INTO b VALUES (1)", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    let flags = QueryFlags {
        one_shot: true,
        ..NO_BEGIN
    };
    let err = session
        .execute(&query, &mut params, &mut collector, 0, flags)
        .unwrap_err();
    let errors = err.into_vec();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], Error::UnexpectedResponse(_)));
    assert_eq!(errors[1].sqlstate(), Some("23505"));
    assert!(collector.statuses().is_empty());
    assert!(!session.is_closed());
    drop(session);
    server.join();
}

#[test]
fn row_limit_and_suspended_portal() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        let execute = messages.iter().find(|m| m.tag == b'E').unwrap();
        assert_eq!(execute.body, [0, 0, 0, 0, 2]);
        peer.parse_complete()
            .bind_complete()
            .row_description(&[("n", 23)])
            .data_row(&[Some("1")])
            .data_row(&[Some("2")])
            .msg(b's', &[])
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("SELECT generate_series(1, 10)", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 2, NO_BEGIN)
        .unwrap();
    assert_eq!(collector.results()[0].rows.len(), 2);
    drop(session);
    server.join();
}

#[test]
fn no_results_discards_rows() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PBES");
        let execute = &messages[2];
        assert_eq!(execute.body, [0, 0, 0, 0, 1]);
        peer.parse_complete()
            .bind_complete()
            .data_row(&[Some("1")])
            .msg(b's', &[])
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("SELECT 1", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    let flags = QueryFlags {
        no_results: true,
        no_metadata: true,
        ..NO_BEGIN
    };
    session
        .execute(&query, &mut params, &mut collector, 0, flags)
        .unwrap();
    assert!(collector.results().is_empty());
    drop(session);
    server.join();
}

#[test]
fn rows_and_status_together() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .row_description(&[("id", 23)])
            .data_row(&[Some("9")])
            .complete("INSERT 0 1")
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("INSERT INTO t VALUES (9) RETURNING id", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    let flags = QueryFlags {
        both_rows_and_status: true,
        ..NO_BEGIN
    };
    session
        .execute(&query, &mut params, &mut collector, 0, flags)
        .unwrap();
    assert_eq!(collector.results()[0].rows.len(), 1);
    assert_eq!(collector.update_count(), Some(1));
    drop(session);
    server.join();
}

#[test]
fn describe_only_resolves_parameter_types() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PDS");
        assert!(messages[0].body.starts_with(b"\0SELECT $1 + 1\0"));
        assert_eq!(messages[1].body, b"S\0");
        peer.parse_complete()
            .msg(b't', &[0, 1, 0, 0, 0, 23])
            .row_description(&[("?column?", 23)])
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("SELECT ? + 1", true);
    let mut params = query.create_parameter_list();
    params.set_null(1, 0).unwrap();
    let mut collector = ResultCollector::new();
    let flags = QueryFlags {
        describe_only: true,
        ..QueryFlags::default()
    };
    session
        .execute(&query, &mut params, &mut collector, 0, flags)
        .unwrap();
    assert_eq!(params.subparams()[0].type_oid(1).unwrap(), 23);
    let results = collector.results();
    assert_eq!(results[0].fields[0].type_oid, 23);
    assert!(results[0].rows.is_empty());
    drop(session);
    server.join();
}

#[test]
fn empty_query_reports_empty_status() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .msg(b'I', &[])
            .ready(b'I')
            .flush();
    });

    let query = Query::parse("", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 0, NO_BEGIN)
        .unwrap();
    assert_eq!(collector.statuses()[0].status, "EMPTY");
    drop(session);
    server.join();
}

#[test]
fn unset_parameter_is_rejected_before_sending() {
    let (server, mut session) = serve(|_| {});
    let query = Query::parse("SELECT ?, ?", true);
    let mut params = query.create_parameter_list();
    params.set_int(1, 1).unwrap();
    let err = session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameterValue(_)));
    assert!(params.set_int(3, 1).is_err());
    drop(session);
    server.join();
}

#[test]
fn failed_parameter_stream_skips_execute() {
    struct Broken;
    impl std::io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk on fire"))
        }
    }

    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PBS");
        // the declared length is honoured with zero padding
        assert!(messages[1].body.ends_with(&[0, 0, 0, 3, 0, 0, 0, 0, 0]));
        peer.parse_complete().bind_complete().ready(b'I').flush();
    });

    let query = Query::parse("INSERT INTO blobs VALUES (?)", true);
    let mut params = query.create_parameter_list();
    params
        .set_bytea_stream(1, Box::new(Broken), 3)
        .unwrap();
    let err = session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameterValue(_)), "{err}");
    assert!(err.to_string().contains("Unable to bind parameter values"));
    drop(session);
    server.join();
}

#[test]
fn encoding_change_mid_query_is_fatal() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .parameter_status("client_encoding", "LATIN1")
            .flush();
    });

    let query = Query::parse("SET client_encoding = 'LATIN1'", false);
    let mut params = query.create_parameter_list();
    let err = session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");
    assert!(session.is_closed());
    server.join();
}

#[test]
fn unknown_message_is_fatal() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.msg(b'Y', b"??").flush();
    });

    let err = session
        .execute_sql("SELECT 1", &mut ResultCollector::new())
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
    assert!(session.is_closed());
    let again = session.execute_sql("SELECT 1", &mut ResultCollector::new());
    assert!(matches!(again, Err(Error::CommunicationFailure(_))));
    server.join();
}

#[test]
fn copy_through_execute_is_refused() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .msg(b'G', &[0, 0, 0])
            .flush();
        let fail = peer.expect(b'f');
        assert!(fail.cstrs()[0].contains("start_copy"));
        peer.error("57014", "COPY from stdin failed").ready(b'I').flush();
    });

    let query = Query::parse("COPY t FROM STDIN", false);
    let mut params = query.create_parameter_list();
    let err = session
        .execute(&query, &mut params, &mut ResultCollector::new(), 0, NO_BEGIN)
        .unwrap_err();
    let errors = err.into_vec();
    assert!(matches!(errors[0], Error::NotImplemented(_)));
    assert_eq!(errors[1].sqlstate(), Some("57014"));
    drop(session);
    server.join();
}

#[test]
fn fastpath_call_with_implicit_begin() {
    let (server, mut session) = serve(|peer| {
        let messages = peer.read_until_sync();
        assert_eq!(tags(&messages), "PBEFS");
        let call = &messages[3];
        let mut expected = 1598i32.to_be_bytes().to_vec();
        expected.extend_from_slice(&[0, 1, 0, 1, 0, 1, 0, 0, 0, 4, 0, 0, 0, 7, 0, 1]);
        assert_eq!(call.body, expected);
        peer.parse_complete()
            .bind_complete()
            .complete("BEGIN")
            .msg(b'V', &[0, 0, 0, 4, 0, 0, 0, 42])
            .ready(b'T')
            .flush();

        peer.read_until_sync();
        peer.msg(b'V', &[0xff, 0xff, 0xff, 0xff]).ready(b'T').flush();
    });

    let mut params = SimpleParameterList::new(1);
    params.set_int(1, 7).unwrap();
    let value = session.fastpath_call(1598, &mut params, false).unwrap();
    assert_eq!(value, Some(vec![0, 0, 0, 42]));
    assert_eq!(session.transaction_status(), TransactionStatus::InTransaction);

    let value = session.fastpath_call(1598, &mut params, false).unwrap();
    assert_eq!(value, None);
    drop(session);
    server.join();
}

#[test]
fn notifications_and_notices_are_queued() {
    let (server, mut session) = serve(|peer| {
        peer.read_until_sync();
        peer.parse_complete()
            .bind_complete()
            .no_data()
            .notification(99, "jobs", "during")
            .notice("relation exists, skipping")
            .complete("LISTEN")
            .ready(b'I')
            .flush();

        peer.notification(99, "jobs", "idle").flush();
    });

    let query = Query::parse("LISTEN jobs", false);
    let mut params = query.create_parameter_list();
    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 0, NO_BEGIN)
        .unwrap();
    assert_eq!(collector.warnings()[0].message.as_deref(), Some("relation exists, skipping"));

    let mut notifications = session.take_notifications();
    for _ in 0..100 {
        if notifications.len() == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
        session.process_notifies().unwrap();
        notifications.extend(session.take_notifications());
    }
    let payloads: Vec<_> = notifications.iter().map(|n| n.payload.as_str()).collect();
    assert_eq!(payloads, ["during", "idle"]);
    assert_eq!(notifications[0].channel, "jobs");
    assert_eq!(notifications[0].pid, 99);
    drop(session);
    server.join();
}
