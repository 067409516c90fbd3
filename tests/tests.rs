use cesil::{
    Column, ErrorKind, Options, PoisonKind, ReadHeader, ReadItem, Record,
    RowBinding, RowEnding, WhitespaceTreatment, WriteColumn, WriteHeader,
    WriteTrailingRowEnding,
};

fn crlf_opts() -> Options {
    Options::builder()
        .row_ending(RowEnding::CrLf)
        .read_header(ReadHeader::Always)
        .build()
        .unwrap()
}

fn int_pair_binding() -> RowBinding<(i64, i64)> {
    RowBinding::new(
        || (0, 0),
        vec![
            Column::new(
                "A",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v, _| {
                    row.0 = v;
                    Ok(())
                },
            ),
            Column::new(
                "B",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v, _| {
                    row.1 = v;
                    Ok(())
                },
            ),
        ],
    )
    .unwrap()
}

fn string_pair_binding() -> RowBinding<(String, String)> {
    RowBinding::new(
        || (String::new(), String::new()),
        vec![
            Column::new(
                "A",
                |s: &str, _| Some(s.to_string()),
                |row: &mut (String, String), v, _| {
                    row.0 = v;
                    Ok(())
                },
            ),
            Column::new(
                "B",
                |s: &str, _| Some(s.to_string()),
                |row: &mut (String, String), v, _| {
                    row.1 = v;
                    Ok(())
                },
            ),
        ],
    )
    .unwrap()
}

#[test]
fn reads_integer_rows() {
    let data = "A,B\r\n1,2\r\n3,4\r\n";
    let mut rdr = crlf_opts()
        .row_reader(data.as_bytes(), int_pair_binding())
        .unwrap();
    assert_eq!(vec![(1, 2), (3, 4)], rdr.read_all().unwrap());
}

#[test]
fn quoted_separator_stays_in_value() {
    let data = "A,B\r\nhello,\"wo,rld\"\r\n";
    let mut rdr = crlf_opts()
        .row_reader(data.as_bytes(), string_pair_binding())
        .unwrap();
    assert_eq!(
        vec![("hello".to_string(), "wo,rld".to_string())],
        rdr.read_all().unwrap()
    );
}

#[test]
fn doubled_quotes_decode() {
    let data = "A,B\r\n\"say \"\"hi\"\"\",x\r\n";
    let mut rdr = crlf_opts()
        .row_reader(data.as_bytes(), string_pair_binding())
        .unwrap();
    assert_eq!(
        vec![("say \"hi\"".to_string(), "x".to_string())],
        rdr.read_all().unwrap()
    );
}

#[test]
fn comments_surface_through_try_read_with_comment() {
    let data = "# top comment\r\nA,B\r\n1,2\r\n";
    let opts = Options::builder()
        .row_ending(RowEnding::CrLf)
        .read_header(ReadHeader::Always)
        .comment(Some(b'#'))
        .build()
        .unwrap();
    let mut rdr =
        opts.row_reader(data.as_bytes(), int_pair_binding()).unwrap();
    assert_eq!(
        ReadItem::Comment("top comment".to_string()),
        rdr.try_read_with_comment().unwrap()
    );
    assert_eq!(ReadItem::Row((1, 2)), rdr.try_read_with_comment().unwrap());
    assert_eq!(ReadItem::End, rdr.try_read_with_comment().unwrap());
}

#[test]
fn required_column_missing_poisons_reader() {
    let data = "A,B\r\n1\r\n";
    let binding = RowBinding::new(
        || (0i64, 0i64),
        vec![
            Column::new(
                "A",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v, _| {
                    row.0 = v;
                    Ok(())
                },
            ),
            Column::new(
                "B",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v, _| {
                    row.1 = v;
                    Ok(())
                },
            )
            .required(),
        ],
    )
    .unwrap();
    let mut rdr = crlf_opts().row_reader(data.as_bytes(), binding).unwrap();
    let err = rdr.try_read().unwrap_err();
    match err.into_kind() {
        ErrorKind::RequiredColumnMissing { column, row } => {
            assert_eq!("B", column);
            assert_eq!(0, row);
        }
        kind => panic!("unexpected error: {:?}", kind),
    }
    let err = rdr.try_read().unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Poisoned(PoisonKind::Error)
    ));
}

#[test]
fn writer_emits_header_and_encodes_only_when_needed() {
    let opts = Options::builder()
        .row_ending(RowEnding::CrLf)
        .write_header(WriteHeader::Always)
        .build()
        .unwrap();
    let columns = vec![
        WriteColumn::display("A", |r: &(String, String), _| r.0.clone()),
        WriteColumn::display("B", |r: &(String, String), _| r.1.clone()),
    ];
    let mut wtr = opts.row_writer(vec![], columns);
    wtr.write_all(&[("a,b".to_string(), "c".to_string())]).unwrap();
    let out = wtr.into_inner().unwrap();
    assert_eq!("A,B\r\n\"a,b\",c\r\n", String::from_utf8(out).unwrap());
}

// Writing a record list and reading it back yields the same values, for a
// few dialect corners at once.
#[test]
fn round_trip_preserves_values() {
    let rows: Vec<Vec<String>> = vec![
        vec!["plain".into(), "with,separator".into(), "".into()],
        vec!["with \"quotes\"".into(), "line\r\nbreak".into(), "x".into()],
        vec!["#not a comment".into(), "trailing".into(), "y".into()],
    ];
    let opts = Options::builder()
        .comment(Some(b'#'))
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();

    let mut wtr = opts.record_writer(vec![]);
    for row in &rows {
        wtr.write_record(row).unwrap();
    }
    let data = wtr.into_inner().unwrap();

    let mut rdr = opts.record_reader(&data[..]).unwrap();
    let mut got = vec![];
    let mut rec = Record::new();
    while rdr.read_record(&mut rec).unwrap() {
        got.push(
            rec.iter()
                .map(|v| String::from_utf8(v.to_vec()).unwrap())
                .collect::<Vec<String>>(),
        );
    }
    assert_eq!(rows, got);
}

// Re-encoding an already encoded value treats it as plain data.
#[test]
fn encoding_is_idempotent_over_round_trips() {
    let original = "say \"hi\", ok";
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();

    let mut wtr = opts.record_writer(vec![]);
    wtr.write_record([original]).unwrap();
    let once = wtr.into_inner().unwrap();

    // Write the *encoded* text as a value and read it back: the decoded
    // result is the encoded form, unchanged.
    let encoded = String::from_utf8(once.clone()).unwrap();
    let encoded = encoded.trim_end_matches("\r\n");
    let mut wtr = opts.record_writer(vec![]);
    wtr.write_record([encoded]).unwrap();
    let twice = wtr.into_inner().unwrap();

    let mut rdr = opts.record_reader(&twice[..]).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec![encoded]);

    let mut rdr = opts.record_reader(&once[..]).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec![original]);
}

#[test]
fn detect_adopts_first_ending_and_rejects_disagreement() {
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();
    // Agreement: all CRLF.
    let mut rdr = opts.record_reader(&b"a\r\nb\r\nc\r\n"[..]).unwrap();
    let mut rec = Record::new();
    let mut n = 0;
    while rdr.read_record(&mut rec).unwrap() {
        n += 1;
    }
    assert_eq!(3, n);

    // Disagreement after the lock.
    let mut rdr = opts.record_reader(&b"a\r\nb\nc\r\n"[..]).unwrap();
    assert!(rdr.read_record(&mut rec).unwrap());
    let err = rdr.read_record(&mut rec).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::ExpectedEndOfRecordOrValue { .. }
    ));
}

#[test]
fn detect_handles_each_ending() {
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();
    for data in ["a\nb\n", "a\r\nb\r\n", "a\rb\r"] {
        let mut rdr = opts.record_reader(data.as_bytes()).unwrap();
        let mut rec = Record::new();
        let mut rows = vec![];
        while rdr.read_record(&mut rec).unwrap() {
            rows.push(String::from_utf8(rec.get(0).unwrap().to_vec()).unwrap());
        }
        assert_eq!(vec!["a", "b"], rows, "data {:?}", data);
    }
}

#[test]
fn whitespace_trim_matrix() {
    let data = "  a  ,\" b \"  \r\n";
    let cases: Vec<(WhitespaceTreatment, Vec<&str>)> = vec![
        (
            WhitespaceTreatment::TRIM_BEFORE_VALUES
                | WhitespaceTreatment::TRIM_AFTER_VALUES,
            vec!["a", " b "],
        ),
        (
            WhitespaceTreatment::TRIM_LEADING_IN_VALUES
                | WhitespaceTreatment::TRIM_TRAILING_IN_VALUES
                | WhitespaceTreatment::TRIM_AFTER_VALUES,
            vec!["a", "b"],
        ),
    ];
    for (treatment, expected) in cases {
        let opts = Options::builder()
            .read_header(ReadHeader::Never)
            .whitespace_treatment(treatment)
            .build()
            .unwrap();
        let mut rdr = opts.record_reader(data.as_bytes()).unwrap();
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).unwrap());
        assert_eq!(rec, expected, "treatment {:?}", treatment);
    }
}

// With TrimBeforeValues, whitespace-only values collapse to empty
// strings; without it they are preserved literally.
#[test]
fn whitespace_only_values() {
    let data = "a,   ,b\r\n";
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .whitespace_treatment(WhitespaceTreatment::TRIM_BEFORE_VALUES)
        .build()
        .unwrap();
    let mut rdr = opts.record_reader(data.as_bytes()).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec!["a", "", "b"]);

    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();
    let mut rdr = opts.record_reader(data.as_bytes()).unwrap();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec!["a", "   ", "b"]);
}

// Values written with whitespace at the edges survive a round trip when
// the dialect trims, because the writer quotes them.
#[test]
fn trimming_round_trip_quotes_whitespace_edges() {
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .whitespace_treatment(
            WhitespaceTreatment::TRIM_BEFORE_VALUES
                | WhitespaceTreatment::TRIM_AFTER_VALUES,
        )
        .build()
        .unwrap();
    let mut wtr = opts.record_writer(vec![]);
    wtr.write_record([" padded ", "plain"]).unwrap();
    let data = wtr.into_inner().unwrap();
    assert_eq!(
        "\" padded \",plain\r\n",
        String::from_utf8(data.clone()).unwrap()
    );

    let mut rdr = opts.record_reader(&data[..]).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec![" padded ", "plain"]);
}

#[test]
fn constructor_binding_reads_rows_without_default() {
    #[derive(Debug, PartialEq)]
    struct Span {
        start: u32,
        end: u32,
        label: String,
    }
    let binding = RowBinding::with_constructor(
        2,
        |hold, _| {
            let start = hold.take(0).expect("slot 0 is enforced");
            let end = hold.take(1).expect("slot 1 is enforced");
            Ok(Span { start, end, label: String::new() })
        },
        vec![
            Column::constructor_parameter(
                "start",
                |s: &str, _| s.parse::<u32>().ok(),
                0,
            ),
            Column::constructor_parameter(
                "end",
                |s: &str, _| s.parse::<u32>().ok(),
                1,
            ),
            Column::new(
                "label",
                |s: &str, _| Some(s.to_string()),
                |span: &mut Span, v, _| {
                    span.label = v;
                    Ok(())
                },
            ),
        ],
    )
    .unwrap();
    // The member column comes first in the file, before the row can
    // possibly exist.
    let data = "label,start,end\r\nhead,10,20\r\n";
    let opts = Options::builder()
        .read_header(ReadHeader::Always)
        .build()
        .unwrap();
    let mut rdr = opts.row_reader(data.as_bytes(), binding).unwrap();
    assert_eq!(
        vec![Span { start: 10, end: 20, label: "head".to_string() }],
        rdr.read_all().unwrap()
    );
}

#[test]
fn serde_round_trip() {
    #[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    struct City {
        name: String,
        pop: u64,
        note: Option<String>,
    }
    let cities = vec![
        City { name: "Boston, MA".to_string(), pop: 4628910, note: None },
        City {
            name: "Concord".to_string(),
            pop: 42695,
            note: Some("small".to_string()),
        },
    ];
    let opts = Options::builder()
        .read_header(ReadHeader::Always)
        .build()
        .unwrap();
    let mut wtr = opts.record_writer(vec![]);
    for city in &cities {
        wtr.serialize(city).unwrap();
    }
    let data = wtr.into_inner().unwrap();
    assert_eq!(
        "name,pop,note\r\n\"Boston, MA\",4628910,\r\nConcord,42695,small\r\n",
        String::from_utf8(data.clone()).unwrap()
    );

    let mut rdr = opts.record_reader(&data[..]).unwrap();
    let got: Vec<City> =
        rdr.deserialize().collect::<cesil::Result<_>>().unwrap();
    assert_eq!(cities, got);
}

#[test]
fn trailing_row_ending_policies() {
    for (policy, expected) in [
        (WriteTrailingRowEnding::Always, "a\r\nb\r\n"),
        (WriteTrailingRowEnding::Never, "a\r\nb"),
    ] {
        let opts = Options::builder()
            .write_trailing_row_ending(policy)
            .build()
            .unwrap();
        let mut wtr = opts.record_writer(vec![]);
        wtr.write_record(["a"]).unwrap();
        wtr.write_record(["b"]).unwrap();
        let out = wtr.into_inner().unwrap();
        assert_eq!(expected, String::from_utf8(out).unwrap());
    }
}

#[test]
fn row_ending_matrix_round_trips() {
    for ending in [RowEnding::Cr, RowEnding::Lf, RowEnding::CrLf] {
        let opts = Options::builder()
            .row_ending(ending)
            .read_header(ReadHeader::Never)
            .build()
            .unwrap();
        let mut wtr = opts.record_writer(vec![]);
        wtr.write_record(["a", "b"]).unwrap();
        wtr.write_record(["c", "d"]).unwrap();
        let data = wtr.into_inner().unwrap();

        let mut rdr = opts.record_reader(&data[..]).unwrap();
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).unwrap());
        assert_eq!(rec, vec!["a", "b"]);
        assert!(rdr.read_record(&mut rec).unwrap());
        assert_eq!(rec, vec!["c", "d"]);
        assert!(!rdr.read_record(&mut rec).unwrap());
    }
}

#[test]
fn alternative_dialect_round_trip() {
    let opts = Options::builder()
        .separator(b';')
        .quote(Some(b'\''))
        .escape(Some(b'\''))
        .row_ending(RowEnding::Lf)
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();
    let mut wtr = opts.record_writer(vec![]);
    wtr.write_record(["it's", "a;b"]).unwrap();
    let data = wtr.into_inner().unwrap();
    assert_eq!("'it''s';'a;b'\n", String::from_utf8(data.clone()).unwrap());

    let mut rdr = opts.record_reader(&data[..]).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec!["it's", "a;b"]);
}

// One byte at a time through the adapter: tokenizer state, detection and
// quoting must all survive refills.
#[test]
fn single_byte_reads() {
    struct OneByte<'a>(&'a [u8]);
    impl<'a> std::io::Read for OneByte<'a> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }
    let data = b"A,B\r\n\"say \"\"hi\"\"\",x\r\n1,2\r\n";
    let opts = Options::builder()
        .read_header(ReadHeader::Always)
        .build()
        .unwrap();
    let mut rdr = opts.record_reader(OneByte(data)).unwrap();
    assert_eq!(*rdr.headers().unwrap().unwrap(), vec!["A", "B"]);
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec!["say \"hi\"", "x"]);
    assert!(rdr.read_record(&mut rec).unwrap());
    assert_eq!(rec, vec!["1", "2"]);
    assert!(!rdr.read_record(&mut rec).unwrap());
}

#[test]
fn io_errors_poison() {
    struct Broken(bool);
    impl std::io::Read for Broken {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.0 {
                self.0 = true;
                let n = b"a,b\r\n".len();
                buf[..n].copy_from_slice(b"a,b\r\n");
                return Ok(n);
            }
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        }
    }
    let opts = Options::builder()
        .read_header(ReadHeader::Never)
        .build()
        .unwrap();
    let mut rdr = opts.record_reader(Broken(false)).unwrap();
    let mut rec = Record::new();
    assert!(rdr.read_record(&mut rec).unwrap());
    let err = rdr.read_record(&mut rec).unwrap_err();
    assert!(err.is_io_error());
    let err = rdr.read_record(&mut rec).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Poisoned(PoisonKind::Error)));
}

#[cfg(feature = "tokio")]
mod asynchronous {
    use super::*;

    #[tokio::test]
    async fn async_matches_sync() {
        let data = "A,B\r\n1,2\r\n3,4\r\n";
        let mut rdr = crlf_opts()
            .async_row_reader(data.as_bytes(), int_pair_binding())
            .unwrap();
        assert_eq!(vec![(1, 2), (3, 4)], rdr.read_all().await.unwrap());
    }

    #[tokio::test]
    async fn async_typed_writer() {
        let opts = Options::builder().build().unwrap();
        let columns = vec![
            WriteColumn::display("A", |r: &(i64, i64), _| r.0),
            WriteColumn::display("B", |r: &(i64, i64), _| r.1),
        ];
        let mut wtr = opts.async_row_writer(vec![], columns);
        wtr.write_all(&[(1, 2), (3, 4)]).await.unwrap();
        let out = wtr.into_inner().await.unwrap();
        assert_eq!(
            "A,B\r\n1,2\r\n3,4\r\n",
            String::from_utf8(out).unwrap()
        );
    }
}
