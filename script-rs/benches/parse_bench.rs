use criterion::{black_box, criterion_group, criterion_main, Criterion};
use script::parse_line;
use script::script::expand::expand;

fn make_script(repeats: usize) -> String {
    let chunk = "# section\n\
                 [!env:CI] [unix] exec server --port=$PORT &\n\
                 * stdout 'listening on ${HOST}:$PORT'\n\
                 ! stderr 'panic|fatal'\n\
                 echo $WORK${/}out.txt 'it''s quoted' # trailing\n";
    chunk.repeat(repeats)
}

fn lookup(name: &str) -> Option<String> {
    match name {
        "PORT" => Some("8080".into()),
        "HOST" => Some("127.0.0.1".into()),
        "WORK" => Some("/tmp/work".into()),
        "/" => Some("/".into()),
        _ => None,
    }
}

fn bench_parse(c: &mut Criterion) {
    let small = make_script(10);
    let large = make_script(1000);

    let mut g = c.benchmark_group("parse_line");
    g.bench_function("small", |b| {
        b.iter(|| {
            for (i, line) in black_box(&small).lines().enumerate() {
                let _ = parse_line("bench.txt", i + 1, line);
            }
        })
    });
    g.bench_function("large", |b| {
        b.iter(|| {
            for (i, line) in black_box(&large).lines().enumerate() {
                let _ = parse_line("bench.txt", i + 1, line);
            }
        })
    });
    g.finish();
}

fn bench_expand(c: &mut Criterion) {
    let plain = "no variables in this argument at all";
    let vars = "$WORK${/}logs${/}$HOST-$PORT.log";
    let pattern = "^listening on ${HOST}:$PORT$";

    let mut g = c.benchmark_group("expand");
    g.bench_function("plain", |b| b.iter(|| expand(black_box(plain), false, lookup)));
    g.bench_function("vars", |b| b.iter(|| expand(black_box(vars), false, lookup)));
    g.bench_function("regexp", |b| b.iter(|| expand(black_box(pattern), true, lookup)));
    g.finish();
}

criterion_group!(benches, bench_parse, bench_expand);
criterion_main!(benches);
