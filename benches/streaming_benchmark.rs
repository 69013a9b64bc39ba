use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sheetstream::{
    decode_sheet, CellAddress, Comment, CommentIndex, DecoderOptions, NumberFormatTable,
    SharedStringTable, SheetEventSink, WorkbookTables,
};

/// Counts events without storing them
#[derive(Default)]
struct CountingSink {
    cells: u64,
    bytes: usize,
}

impl SheetEventSink for CountingSink {
    fn start_row(&mut self, _row: u32) {}

    fn cell(&mut self, _address: CellAddress, value: Option<&str>, _comment: Option<&Comment>) {
        self.cells += 1;
        self.bytes += value.map_or(0, str::len);
    }

    fn end_row(&mut self, _row: u32) {}
}

fn synthetic_sheet(rows: usize) -> String {
    let mut xml = String::with_capacity(rows * 200);
    xml.push_str(
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for r in 1..=rows {
        xml.push_str(&format!(
            concat!(
                r#"<row r="{r}">"#,
                r#"<c r="A{r}"><v>{r}</v></c>"#,
                r#"<c r="B{r}" t="s"><v>{s}</v></c>"#,
                r#"<c r="C{r}" s="1"><v>{amount}</v></c>"#,
                r#"<c r="D{r}" s="2"><v>{date}</v></c>"#,
                r#"<c r="E{r}" t="b"><v>{flag}</v></c>"#,
                "</row>"
            ),
            r = r,
            s = r % 100,
            amount = r as f64 * 12.345,
            date = 45000 + r % 365,
            flag = r % 2,
        ));
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn tables() -> WorkbookTables {
    WorkbookTables::new(
        SharedStringTable::from_strings((0..100).map(|i| format!("Name_{}", i))),
        NumberFormatTable::new()
            .with_cell_style(0)
            .with_cell_style(4)
            .with_cell_style(14),
    )
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.sample_size(10);
    let tables = tables();

    for size in [1000, 10000, 50000].iter() {
        let xml = synthetic_sheet(*size);
        group.throughput(Throughput::Bytes(xml.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &xml, |b, xml| {
            b.iter(|| {
                let mut sink = CountingSink::default();
                decode_sheet(
                    black_box(xml.as_bytes()),
                    &tables,
                    None,
                    DecoderOptions::default(),
                    &mut sink,
                )
                .unwrap();
                black_box(sink.cells)
            });
        });
    }

    group.finish();
}

fn benchmark_comments(c: &mut Criterion) {
    let mut group = c.benchmark_group("comments");
    group.sample_size(10);
    let tables = tables();
    let xml = synthetic_sheet(10000);

    // one comment every tenth row, half of them on cells that are never written
    let comments: CommentIndex = (0..1000u32)
        .map(|i| {
            let col = if i % 2 == 0 { 1 } else { 7 };
            (CellAddress::new(i * 10, col), Comment::new(format!("note {}", i)))
        })
        .collect();

    group.bench_function("10000_rows_1000_comments", |b| {
        b.iter(|| {
            let mut sink = CountingSink::default();
            decode_sheet(
                xml.as_bytes(),
                &tables,
                Some(&comments),
                DecoderOptions::default(),
                &mut sink,
            )
            .unwrap();
            black_box(sink.bytes)
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_decode, benchmark_comments);
criterion_main!(benches);
