use std::fs::File;
use std::path::Path;

use datapipes_core::{CollectingSink, Error, Pipeline, Processing, Record, RunContext, Sink};
use datapipes_endpoints::{sink_factory, source_factory, TarReader, TarWriter};
use tempfile::TempDir;

fn shard(index: usize, len: usize) -> Vec<Record> {
    (0..len)
        .map(|i| {
            Record::new(format!("shard{index}/{i:04}"))
                .with_field("jpg", vec![u8::try_from(i % 256).unwrap(); 100 + i])
                .with_field("cls", (i % 7).to_string())
        })
        .collect()
}

fn write_shard(path: &Path, records: &[Record]) {
    let mut writer = TarWriter::new(File::create(path).unwrap());
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
}

fn read_shard(path: &Path) -> Vec<Record> {
    let mut reader = TarReader::new(File::open(path).unwrap());
    reader.records().unwrap().collect::<Result<_, _>>().unwrap()
}

fn location(path: &Path) -> String {
    path.to_str().unwrap().to_owned()
}

#[tokio::test]
async fn containers_concatenate_in_order() {
    let dir = TempDir::new().unwrap();
    let mut inputs = Vec::new();
    let mut expected = Vec::new();
    for (index, len) in [(0, 25), (1, 0), (2, 40), (3, 1)] {
        let path = dir.path().join(format!("in-{index}.tar"));
        let records = shard(index, len);
        write_shard(&path, &records);
        inputs.push(location(&path));
        expected.extend(records);
    }
    let output = dir.path().join("out.tar");

    let stats = Processing::new(
        source_factory(inputs, true),
        Pipeline::identity(),
        sink_factory(location(&output), true),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.records_read, 66);
    assert_eq!(stats.records_written, 66);
    assert_eq!(read_shard(&output), expected);
}

#[tokio::test]
async fn missing_container_fails_after_earlier_records() {
    let dir = TempDir::new().unwrap();
    let present = dir.path().join("present.tar");
    write_shard(&present, &shard(0, 5));
    let inputs = vec![location(&present), location(&dir.path().join("absent.tar"))];

    let sink = CollectingSink::new();
    let collected = sink.handle();
    let error = Processing::new(
        source_factory(inputs, true),
        Pipeline::identity(),
        move |_: &RunContext| Ok(Box::new(sink) as Box<dyn Sink>),
    )
    .run()
    .await
    .unwrap_err();

    match &error {
        Error::Component { component, source } => {
            assert!(component.starts_with("source archive"), "{component}");
            assert!(source.to_string().contains("absent.tar"), "{source}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(collected.lock().unwrap().len() <= 5);
}

#[tokio::test]
async fn malformed_member_is_a_codec_fault() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.tar");
    {
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        builder.append_data(&mut header, "no_extension", &b"abc"[..]).unwrap();
        builder.finish().unwrap();
    }
    let output = dir.path().join("out.tar");

    let error = Processing::new(
        source_factory(vec![location(&path)], true),
        Pipeline::identity(),
        sink_factory(location(&output), true),
    )
    .run()
    .await
    .unwrap_err();

    match error {
        Error::Component { source, .. } => assert!(matches!(*source, Error::Codec(_)), "{source}"),
        other => panic!("unexpected {other:?}"),
    }
}
