use tokio::io::AsyncRead;
use multiform::Multipart;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Get an `AsyncRead` and the boundary from somewhere, e.g. a server request body.
    let (reader, boundary) = get_async_reader_from_somewhere().await;

    let mut multipart = Multipart::with_reader(reader, boundary);

    while let Some(mut field) = multipart.next_field().await? {
        println!("Name: {:?}, File Name: {:?}", field.name(), field.file_name());

        for (name, value) in field.headers() {
            println!("  {}: {:?}", name, value);
        }

        // A field body can be read once. Clone it first to read it twice.
        let mut copy = field.try_clone()?;
        let content = field.text().await?;
        let raw = copy.bytes().await?;

        println!("Content: {:?} ({} bytes)", content, raw.len());
    }

    Ok(())
}

async fn get_async_reader_from_somewhere() -> (impl AsyncRead + Send + 'static, &'static str) {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";

    (data.as_bytes(), "X-BOUNDARY")
}
