use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use webrouter::{
    compose, param::ALL, tree::RouteTree, Dispatcher, Handler, Request, Response,
};

fn build_tree(cache_size: usize) -> RouteTree<usize> {
    let mut tree = RouteTree::with_cache(cache_size);
    for i in 0..100 {
        tree.add("GET", format!("/resource{}", i), i);
        tree.add("GET", format!("/resource{}/:id", i), i);
        tree.add("GET", format!("/resource{}/:id/items/:item", i), i);
    }
    tree.add(ALL, "/static/*", 1000);
    tree
}

fn route_find_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_find");

    let urls = [
        ("literal", "/resource50"),
        ("param", "/resource50/42"),
        ("two_params", "/resource50/42/items/J%C3%B6rg?x=1"),
        ("wildcard", "/static/css/site/main.css"),
        ("miss", "/nothing/here"),
    ];

    for (name, url) in urls.iter() {
        let uncached = build_tree(0);
        group.bench_with_input(BenchmarkId::new("uncached", name), url, |b, url| {
            b.iter(|| uncached.find("GET", black_box(url)));
        });

        let cached = build_tree(1000);
        group.bench_with_input(BenchmarkId::new("cached", name), url, |b, url| {
            b.iter(|| cached.find("GET", black_box(url)));
        });
    }

    group.finish();
}

fn pipeline_run_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_run");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for count in [1usize, 10, 100, 1000].iter() {
        let handlers: Vec<Handler> = (0..*count)
            .map(|_| {
                Handler::sync(|_req, _res, next| {
                    next.pass();
                    Ok(())
                })
            })
            .collect();
        let pipeline = compose(handlers);

        group.bench_with_input(BenchmarkId::from_parameter(count), &pipeline, |b, pipeline| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut req = Request::new("GET", "/");
                    let mut res = Response::new();
                    pipeline.run(&mut req, &mut res).await
                })
            });
        });
    }

    group.finish();
}

fn dispatcher_handle_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let mut dispatcher = Dispatcher::new();
    dispatcher.get(
        "/users/:user",
        Handler::sync(|req, res, _next| {
            let user = req.params().get("user").unwrap_or_default().to_string();
            res.text(user);
            Ok(())
        }),
    );

    c.bench_function("dispatcher_handle", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut req = Request::new("GET", black_box("/users/andi?x=1"));
                let mut res = Response::new();
                dispatcher.handle(&mut req, &mut res).await;
                res
            })
        });
    });
}

criterion_group!(
    benches,
    route_find_benchmark,
    pipeline_run_benchmark,
    dispatcher_handle_benchmark
);
criterion_main!(benches);
