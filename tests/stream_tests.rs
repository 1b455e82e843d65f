mod common;
use common::{Tagged, read_records, write_records};

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use sortjoin::{
    DecoupledReader, Dictionary, Error, ReaderConfig, RecordReader, SortConfig, merge_two,
};
use tempfile::TempDir;

#[test]
fn test_dictionary_stream_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tagged.bin");
    let dict = Arc::new(Dictionary::new(["highway", "footway"]));
    let records = vec![
        Tagged::new(1, "highway"),
        Tagged::new(2, "Bäckerstraße"),
        Tagged::new(3, "footway"),
        Tagged::new(4, ""),
    ];
    write_records(&path, &records, &dict);

    // Dictionary hits cost 4 bytes instead of length + text.
    let size = std::fs::metadata(&path).unwrap().len();
    let verbatim = 4 * (8 + 4) + "Bäckerstraße".len() as u64;
    assert_eq!(size, verbatim);

    let read: Vec<Tagged> = read_records(&path, &dict);
    assert_eq!(read, records);
}

#[test]
fn test_reader_with_mismatched_dictionary_stops_leniently() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tagged.bin");
    let writer_dict = Arc::new(Dictionary::new(["a", "b", "c"]));
    write_records(
        &path,
        &[Tagged::new(1, "x"), Tagged::new(2, "c"), Tagged::new(3, "y")],
        &writer_dict,
    );

    let reader_dict = Arc::new(Dictionary::new(["a"]));
    let lenient: Vec<Tagged> =
        RecordReader::<Tagged>::open(&path, Arc::clone(&reader_dict), &SortConfig::default())
            .unwrap()
            .collect::<sortjoin::Result<_>>()
            .unwrap();
    assert_eq!(lenient, vec![Tagged::new(1, "x")]);

    let mut strict =
        RecordReader::<Tagged>::open(&path, reader_dict, &SortConfig::default().strict()).unwrap();
    assert!(strict.next_record().unwrap().is_some());
    assert!(matches!(strict.next_record(), Err(Error::Decode { offset: 13, .. })));
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = RecordReader::<i64>::open(
        dir.path().join("absent.bin"),
        Arc::new(Dictionary::empty()),
        &SortConfig::default(),
    );
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_decoupled_reader_over_file_with_tiny_buffer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bytes.bin");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&path, &data).unwrap();

    let config = ReaderConfig::default()
        .with_buffer_size(4096)
        .with_chunk_size(1000)
        .with_poll_interval(Duration::from_millis(10))
        .with_close_timeout(Some(Duration::from_secs(10)));
    let mut reader = DecoupledReader::new(std::fs::File::open(&path).unwrap(), &config).unwrap();

    let mut head = vec![0u8; 1500];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(&head[..], &data[..1500]);
    assert_eq!(reader.skip(500).unwrap(), 500);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(&rest[..], &data[2000..]);
    assert_eq!(reader.available(), 0);
    reader.close().unwrap();
}

#[test]
fn test_merge_two_files() {
    let dir = TempDir::new().unwrap();
    let dict = Arc::new(Dictionary::empty());
    let (a, b, out) = (
        dir.path().join("a.bin"),
        dir.path().join("b.bin"),
        dir.path().join("out.bin"),
    );
    write_records(&a, &[Tagged::new(1, "a"), Tagged::new(3, "a")], &dict);
    write_records(&b, &[Tagged::new(1, "b"), Tagged::new(2, "b")], &dict);

    let written = merge_two::<Tagged, _>(
        &a,
        &b,
        &out,
        Arc::clone(&dict),
        Tagged::by_key,
        &SortConfig::default(),
    )
    .unwrap();
    assert_eq!(written, 3);
    let merged: Vec<Tagged> = read_records(&out, &dict);
    assert_eq!(
        merged,
        vec![Tagged::new(1, "a"), Tagged::new(2, "b"), Tagged::new(3, "a")]
    );
}
