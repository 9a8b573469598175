use std::{str::FromStr, time::Duration};

use realm_session::{HttpClient, Session};
use tonic::transport::Endpoint;
use tower::ServiceBuilder;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_id = "my-client-id";
    let client_secret = "my-client-secret";
    let realm = "my-realm";
    let endpoint = Url::from_str("https://keycloak.example.com")?;

    // Create a new Session. No token is fetched until the first request needs one.
    let session = Session::builder(client_id, client_secret, realm, endpoint)
        .add_scope("my-scope")
        .access_token_tolerance(Duration::from_secs(30)) // Renew 30 seconds before expiry
        .add_request_skipper(|request: &reqwest::Request| request.url().path() == "/health")
        .build()?;

    // Wrap a reqwest Client with `HttpClient`. The authorization header is added to every request.
    let client = HttpClient::new(session.clone()).set_client(reqwest::Client::new());
    let response = client.get("https://api.example.com/data").send().await?;
    println!("HTTP status: {}", response.status());

    // Requests matching a skipper are sent without credentials.
    let _health = client.get("https://api.example.com/health").send().await?;

    // Apply the session to a tonic channel. Unary and streaming calls are authorized alike.
    let channel = Endpoint::from_static("http://service.example.com:50051").connect_lazy();
    let _channel = ServiceBuilder::new()
        .layer(session.grpc_layer())
        .service(channel);
    // let mut client = GreeterServiceClient::new(_channel);

    // Escape hatches.
    if let Err(e) = session.force_refresh().await {
        println!("Refresh failed ({e}), logging in again");
        session.force_authenticate().await?;
    }
    if let Some(token) = session.token() {
        println!("Token expires in {}s", token.expires_in.as_secs());
    }

    Ok(())
}
