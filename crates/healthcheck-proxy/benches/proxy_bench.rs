use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use healthcheck_proxy::{
    ClientAuth, HealthCheckProxySettings, ListenerDescriptor, NoIdentity, PortRouter,
    ProxyHeaderV1, StatusSnapshot, TargetClient, TargetDescriptor, TlsPolicy,
};
use http::StatusCode;
use std::hint::black_box;
use std::net::SocketAddr;
use std::time::Duration;

fn listeners(count: u16) -> Vec<ListenerDescriptor> {
    let mut listeners = Vec::new();
    for i in 0..count {
        let front = 8000 + i;
        let secure = 9000 + i;
        listeners.push(ListenerDescriptor::plain(front).with_health_check_proxy(
            HealthCheckProxySettings {
                port: secure,
                client_timeout: Duration::from_secs(1),
                cache_expiry: Duration::from_secs(1),
            },
        ));
        listeners.push(ListenerDescriptor::tls(secure, ClientAuth::None));
    }
    listeners
}

fn router_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    for count in [1u16, 16, 256] {
        let router = PortRouter::build(&listeners(count), &NoIdentity, None).unwrap();

        group.bench_with_input(BenchmarkId::new("resolve_hit", count), &count, |b, _| {
            b.iter(|| black_box(router.resolve(black_box(8000))))
        });
        group.bench_with_input(BenchmarkId::new("resolve_miss", count), &count, |b, _| {
            b.iter(|| black_box(router.resolve(black_box(7999))))
        });
    }

    group.finish();
}

fn cache_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let snapshot = StatusSnapshot::from_response(
        StatusCode::OK,
        Some("text/html".to_string()),
        bytes::Bytes::from_static(b"OK"),
    );
    group.bench_function("is_expired", |b| {
        b.iter(|| black_box(snapshot.is_expired(black_box(Duration::from_secs(1)))))
    });

    // Warm cache: fetch never touches the network
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = TargetClient::new(
        TargetDescriptor {
            port: 1,
            timeout: Duration::from_millis(100),
            cache_expiry: Duration::from_secs(3600),
            proxy_protocol: false,
        },
        TlsPolicy::TrustAll,
        None,
    );
    client.close();
    rt.block_on(client.fetch());

    group.bench_function("fetch_cached", |b| {
        b.iter(|| rt.block_on(async { black_box(client.fetch().await) }))
    });

    group.finish();
}

fn proxy_header_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("proxy_protocol");

    let header = ProxyHeaderV1::new(
        "127.0.0.1:53412".parse::<SocketAddr>().unwrap(),
        "127.0.0.1:8443".parse::<SocketAddr>().unwrap(),
    );
    let encoded = header.encode();

    group.bench_function("encode_v1", |b| b.iter(|| black_box(header.encode())));
    group.bench_function("parse_v1", |b| {
        b.iter(|| black_box(ProxyHeaderV1::parse(black_box(&encoded))))
    });

    group.finish();
}

criterion_group!(
    benches,
    router_benchmark,
    cache_benchmark,
    proxy_header_benchmark
);
criterion_main!(benches);
