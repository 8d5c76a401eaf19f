use crate::config::ActionConfig;

const ASK_PRODUCT: &str = "Please provide a product name.";
const PRODUCT_NOT_FOUND: &str = "Sorry, I couldn't find that product.";

fn action(
    name: &str,
    endpoint: &str,
    required_entities: &[&str],
    prompt: Option<&str>,
    fallback: &str,
) -> ActionConfig {
    ActionConfig {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        required_entities: required_entities.iter().map(|e| e.to_string()).collect(),
        prompt: prompt.map(str::to_string),
        fallback: fallback.to_string(),
        select: None,
    }
}

/// 零售机器人的内置动作表，配置文件未给出 actions 时使用
pub fn retail_actions() -> Vec<ActionConfig> {
    vec![
        action(
            "action_provide_product_info",
            "products/search-product-view/?products={product}",
            &["product"],
            Some(ASK_PRODUCT),
            PRODUCT_NOT_FOUND,
        ),
        action(
            "action_provide_product_variation",
            "products/search-product-view/?products={product}",
            &["product"],
            Some(ASK_PRODUCT),
            PRODUCT_NOT_FOUND,
        ),
        action(
            "action_check_stock",
            "products/search-product-view/?products={product}&in_stock=true",
            &["product"],
            Some(ASK_PRODUCT),
            PRODUCT_NOT_FOUND,
        ),
        action(
            "action_inform_sales",
            "products/sale-product-view/",
            &[],
            None,
            "Sorry, there is no ongoing sale!",
        ),
        action(
            "action_inform_combo_discount",
            "products/view_comboproduct/",
            &[],
            None,
            "Currently, there are no combo discounts.",
        ),
        action(
            "action_check_delivery",
            "products/check-forbidden-delivery/{product}/{district}/",
            &["product", "district"],
            Some("Please specify a product name and a district."),
            "Can't find specified product",
        ),
        action(
            "action_track_order_details",
            "orders/track-order/{ordercode}/{email}/",
            &["ordercode", "email"],
            Some("Please specify an order code and an email address."),
            "Sorry, I couldn't find that order.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_well_formed() {
        let actions = retail_actions();
        assert_eq!(actions.len(), 7);
        for a in &actions {
            assert!(a.name.starts_with("action_"), "{}", a.name);
            assert!(!a.fallback.is_empty());
            for entity in &a.required_entities {
                assert!(a.endpoint.contains(&format!("{{{}}}", entity)), "{}", a.name);
            }
            if a.required_entities.is_empty() {
                assert!(a.prompt.is_none());
            }
        }
    }

    #[test]
    fn stock_check_filters_in_stock() {
        let stock = retail_actions()
            .into_iter()
            .find(|a| a.name == "action_check_stock")
            .unwrap();
        assert!(stock.endpoint.ends_with("&in_stock=true"));
        assert_eq!(stock.prompt_text(), ASK_PRODUCT);
    }

    #[test]
    fn actions_without_entities_prompt_with_fallback() {
        let sales = retail_actions()
            .into_iter()
            .find(|a| a.name == "action_inform_sales")
            .unwrap();
        assert_eq!(sales.prompt_text(), "Sorry, there is no ongoing sale!");
    }
}
