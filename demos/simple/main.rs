use std::{collections::HashMap, time::Duration};

use flagtrack::{Event, EventCategory, Modification};

pub fn main() {
    let env_id = std::env::var("FLAGTRACK_ENV_ID").unwrap();
    let api_key = std::env::var("FLAGTRACK_API_KEY").unwrap();
    let client = flagtrack::ClientConfig::from_env_id(env_id, api_key)
        .sqlite("flagtrack.db")
        .to_client()
        .unwrap();

    // Start a thread that delivers queued hits in the background.
    let synchronizer = client.start_synchronizer_thread().unwrap();

    client.authenticate("visitor-1").unwrap();

    // Modifications normally come from the targeting engine.
    let mut modifications = HashMap::new();
    modifications.insert(
        "checkout-button".to_owned(),
        Modification {
            key: "checkout-button".to_owned(),
            value: "green".into(),
            campaign_id: "campaign-1".to_owned(),
            variation_group_id: "group-1".to_owned(),
            variation_id: "variation-2".to_owned(),
            is_reference: false,
        },
    );
    client.set_modifications(modifications);

    // The first read makes the allocation sticky and queues an activation hit.
    let color = client.get_modification_value("checkout-button", "blue".to_owned(), true);
    println!("Button color: {color}");

    client
        .send_hit(&Event::new(EventCategory::ActionTracking, "checkout"))
        .unwrap();

    synchronizer.trigger();
    println!("Last pass: {:?}", synchronizer.wait_for_pass(Duration::from_secs(30)));

    synchronizer.shutdown().unwrap();
}
