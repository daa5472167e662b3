//! Round trips against a real server. Skipped unless DATABASE_URL is set.

use std::env;
use std::io::Cursor;

use zero_pgwire::{DropHandler, Query, QueryFlags, ResultCollector, Session};

fn get_session() -> Option<Session> {
    let mut db_url = env::var("DATABASE_URL").ok()?;
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Some(Session::connect(db_url.as_str()).expect("Failed to connect"))
}

#[test]
fn parameterized_select() {
    let Some(mut session) = get_session() else {
        return;
    };
    let query = Query::parse("SELECT ?::int4 + 1, ?::text", true);
    let mut params = query.create_parameter_list();
    params.set_int(1, 41).unwrap();
    params.set_string(2, "it's").unwrap();

    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 0, QueryFlags::default())
        .unwrap();
    let row = &collector.results()[0].rows[0];
    assert_eq!(row.get_str(0).unwrap(), Some("42"));
    assert_eq!(row.get_str(1).unwrap(), Some("it's"));
    session.execute_sql("ROLLBACK", &mut DropHandler::new()).unwrap();
}

#[test]
fn server_error_keeps_session_usable() {
    let Some(mut session) = get_session() else {
        return;
    };
    let err = session
        .execute_sql("SELECT * FROM no_such_table_zero_pgwire", &mut ResultCollector::new())
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    session.execute_sql("ROLLBACK", &mut DropHandler::new()).unwrap();

    let mut collector = ResultCollector::new();
    session.execute_sql("SELECT 1", &mut collector).unwrap();
    assert_eq!(collector.results()[0].rows.len(), 1);
}

#[test]
fn copy_round_trip() {
    let Some(mut session) = get_session() else {
        return;
    };
    let mut handler = DropHandler::new();
    session
        .execute_sql("CREATE TEMP TABLE copy_rt (n int, s text)", &mut handler)
        .unwrap();

    let mut copy = session
        .start_copy("COPY copy_rt FROM STDIN", true)
        .unwrap()
        .into_copy_in()
        .unwrap();
    for n in 0..100 {
        copy.write_to_copy(format!("{n}\trow {n}\n").as_bytes()).unwrap();
    }
    assert_eq!(copy.end_copy().unwrap(), 100);
    drop(copy);

    let mut out = session
        .start_copy("COPY copy_rt TO STDOUT", true)
        .unwrap()
        .into_copy_out()
        .unwrap();
    let mut lines = 0;
    while let Some(chunk) = out.read_from_copy().unwrap() {
        lines += chunk.iter().filter(|b| **b == b'\n').count();
    }
    assert_eq!(lines, 100);
    drop(out);
    session.execute_sql("ROLLBACK", &mut DropHandler::new()).unwrap();
}

#[test]
fn bytea_stream_parameter() {
    let Some(mut session) = get_session() else {
        return;
    };
    let data: Vec<u8> = (0..=255).collect();
    let query = Query::parse("SELECT length(?)", true);
    let mut params = query.create_parameter_list();
    params
        .set_bytea_stream(1, Box::new(Cursor::new(data.clone())), data.len())
        .unwrap();
    let mut collector = ResultCollector::new();
    session
        .execute(&query, &mut params, &mut collector, 0, QueryFlags::default())
        .unwrap();
    assert_eq!(collector.results()[0].rows[0].get_str(0).unwrap(), Some("256"));
    session.execute_sql("ROLLBACK", &mut DropHandler::new()).unwrap();
}
