#![no_main]

use std::convert::Infallible;

use futures_util::stream;
use libfuzzer_sys::fuzz_target;
use multiform::bytes::Bytes;
use multiform::Multipart;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    // The first byte picks a chunk size so splits across markers get covered.
    let Some((&size, data)) = data.split_first() else {
        return;
    };
    let size = usize::from(size.max(1));

    let chunks: Vec<Result<Bytes, Infallible>> = data.chunks(size).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
    let mut multipart = Multipart::new(stream::iter(chunks), "X-BOUNDARY");

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        while let Ok(Some(mut field)) = multipart.next_field().await {
            let mut cloned = match field.try_clone() {
                Ok(cloned) => cloned,
                Err(_) => continue,
            };

            let _ = cloned.bytes().await;
            let _ = field.text().await;
            assert!(field.bytes().await.is_err());
        }

        assert!(matches!(multipart.next_field().await, Ok(None)));
    })
});
